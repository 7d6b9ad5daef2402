//! Shared domain models for collections, plays and metadata.

mod options;
mod suggested;

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

pub use options::{FilterAndSortOptions, PlaytimeRange, SortOption, SortSelection};
pub use suggested::{PlayerCount, PlayerVotes, SuggestedPlayersMap};

/// Stable identifier of a game at the remote source.
pub type GameId = u32;

/// A category tag a game belongs to, ranked by the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFamily {
    /// Raw family key (e.g. `strategygames`).
    pub name: String,
    /// Human-readable family name.
    pub friendly_name: String,
    /// Rank value used for best-match selection; lower is better.
    pub value: f64,
    /// Bayesian average rating within the family.
    pub bayes_average: f64,
}

/// A single game as reported by a user's collection.
///
/// `owners` and `user_rating` are accumulation fields: they start out
/// describing one user's copy and grow as collections are merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Remote identifier, unique within a merged collection.
    pub id: GameId,
    /// Display name.
    pub name: String,
    /// Small cover image.
    pub thumbnail_url: String,
    /// Full-size cover image.
    pub image_url: String,
    /// Year of first publication, when known.
    pub year_published: Option<i32>,
    /// Lowest supported player count.
    pub min_players: Option<u32>,
    /// Highest supported player count.
    pub max_players: Option<u32>,
    /// Shortest advertised playtime in minutes.
    pub min_playtime: Option<u32>,
    /// Longest advertised playtime in minutes.
    pub max_playtime: Option<u32>,
    /// Typical playtime in minutes.
    pub playing_time: Option<u32>,
    /// Community average rating.
    pub average_rating: f64,
    /// Ranked family tags.
    #[serde(default)]
    pub families: Vec<GameFamily>,
    /// Usernames owning this game, in first-seen order, duplicate-free.
    #[serde(default)]
    pub owners: Vec<String>,
    /// Per-user rating; an inner `None` means "rated, but without a score".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<HashMap<String, Option<f64>>>,
}

impl GameRecord {
    /// Average of all scored user ratings, `None` when nobody left a score.
    pub fn average_user_rating(&self) -> Option<f64> {
        let ratings = self.user_rating.as_ref()?;
        let scores: Vec<f64> = ratings.values().filter_map(|score| *score).collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Secondary metadata fetched per game id in batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedGameRecord {
    /// Long-form description.
    pub description: Option<String>,
    /// Complexity on a 1-5 scale.
    pub weight: Option<f64>,
    /// Mechanic tags.
    #[serde(default)]
    pub mechanics: Vec<String>,
    /// Category tags.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Community vote tallies per player count.
    #[serde(default)]
    pub suggested_players: SuggestedPlayersMap,
}

/// One logged play of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    /// Unique play identifier at the remote source.
    pub play_id: u64,
    /// Date the play was logged for.
    pub date: NaiveDate,
    /// How many times the game was played in this entry.
    pub quantity: u32,
    /// Play length in minutes, when recorded.
    pub length: Option<u32>,
    /// Game this play belongs to.
    pub game_id: GameId,
    /// Username whose history this play came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_by: Option<String>,
}

/// Play-history aggregates for a single merged game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayStats {
    /// All plays of this game across the requested users.
    pub plays: Vec<PlayRecord>,
    /// Most recent play date.
    pub last_played: Option<NaiveDate>,
    /// Sum of recorded play lengths in minutes.
    pub time_played_minutes: u32,
}

/// A merged game together with whatever enrichment has arrived so far.
///
/// Extended info and play stats attach asynchronously after the base record
/// exists, so both sides are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlus {
    /// The merged base record.
    pub game: GameRecord,
    /// Batch-fetched metadata, once loaded.
    pub extra: Option<ExtendedGameRecord>,
    /// Play-history aggregates, once loaded.
    pub stats: Option<PlayStats>,
}

impl GamePlus {
    /// Wrap a bare record with no enrichment attached yet.
    pub fn base(game: GameRecord) -> Self {
        Self {
            game,
            extra: None,
            stats: None,
        }
    }

    /// Complexity weight, when extended info has arrived.
    pub fn weight(&self) -> Option<f64> {
        self.extra.as_ref().and_then(|extra| extra.weight)
    }

    /// Number of recorded plays.
    pub fn play_count(&self) -> usize {
        self.stats.as_ref().map(|stats| stats.plays.len()).unwrap_or(0)
    }

    /// Date of the most recent play.
    pub fn last_played(&self) -> Option<NaiveDate> {
        self.stats.as_ref().and_then(|stats| stats.last_played)
    }
}

/// Outcome of checking whether a username exists at the remote source.
#[derive(Debug)]
pub enum UserValidity {
    /// The username exists.
    Valid,
    /// The username does not exist.
    Invalid,
    /// The check itself failed; validity is undetermined.
    Unknown {
        /// Transport or parse failure reported by the gateway.
        error: GatewayError,
    },
}
