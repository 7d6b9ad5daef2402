//! Filter and sort option types accepted by the pipeline.

use serde::{Deserialize, Serialize};

/// A single sort criterion.
///
/// Serialized names match the option strings used by the presentation layer,
/// so saved option sets keep working across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOption {
    /// Ascending by name.
    Alphabetic,
    /// Descending by community average rating.
    #[serde(rename = "bggrating")]
    BggRating,
    /// Descending by publication year.
    New,
    /// Ascending by publication year.
    Old,
    /// Descending by the owners' average rating.
    #[serde(rename = "userrating")]
    UserRating,
    /// Descending by complexity weight.
    #[serde(rename = "weight-heavy")]
    WeightHeavy,
    /// Ascending by complexity weight.
    #[serde(rename = "weight-light")]
    WeightLight,
    /// Most recently played first.
    PlayedRecently,
    /// Least recently played first.
    PlayedLongAgo,
    /// Most plays first.
    PlayedALot,
    /// Fewest plays first.
    PlayedNotALot,
    /// Best fit for a given player count first.
    #[serde(rename_all = "camelCase")]
    SuggestedPlayers {
        /// Player count to score against; `None` leaves the order untouched.
        number_of_players: Option<u32>,
    },
}

/// One criterion, or an ordered set combined by rank aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSelection {
    /// Sort by a single criterion.
    Single(SortOption),
    /// Combine several criteria into one ranked merge.
    Multiple(Vec<SortOption>),
}

/// Playtime window a game must fit entirely within, in minutes.
///
/// Absent bounds widen to the loosest possible value, so partial options
/// only restrict on the supplied side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaytimeRange {
    /// Lower bound on the game's minimum playtime.
    pub minimum: Option<u32>,
    /// Upper bound on the game's maximum playtime.
    pub maximum: Option<u32>,
}

/// How to narrow and order a merged collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAndSortOptions {
    /// Keep games whose playtime range fits inside this window.
    pub playtime: Option<PlaytimeRange>,
    /// Keep games playable with exactly this many players.
    pub player_count: Option<u32>,
    /// Sort criteria; defaults to community rating when unset.
    pub sort: Option<SortSelection>,
}
