//! Loading-status entries surfaced to the presentation layer.

use crate::models::GameRecord;

/// Retry diagnostics attached to an entry while its fetch is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDiagnostics {
    /// The remote source signalled rate limiting.
    pub backoff: bool,
}

/// What a loading-status entry tracks.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadingKind {
    /// A user's collection fetch.
    Collection {
        /// Username being fetched.
        username: String,
    },
    /// An extended-info fetch covering this game.
    Game {
        /// The game awaiting extended info.
        game: GameRecord,
    },
    /// A user's play-history fetch.
    Plays {
        /// Username being fetched.
        username: String,
    },
}

/// One in-flight (or queued) load with its retry state.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingStatus {
    /// What is being loaded.
    pub kind: LoadingKind,
    /// Whether a request is currently in flight or waiting to retry.
    pub is_loading: bool,
    /// Diagnostics from the most recent "not ready" signal.
    pub retry: Option<RetryDiagnostics>,
}

impl LoadingStatus {
    /// True when this entry tracks the given username's collection.
    pub fn is_collection_for(&self, username: &str) -> bool {
        matches!(&self.kind, LoadingKind::Collection { username: entry } if entry == username)
    }

    /// True when this entry tracks the given username's plays.
    pub fn is_plays_for(&self, username: &str) -> bool {
        matches!(&self.kind, LoadingKind::Plays { username: entry } if entry == username)
    }

    /// True when this entry tracks extended info for the given game id.
    pub fn is_game(&self, id: crate::models::GameId) -> bool {
        matches!(&self.kind, LoadingKind::Game { game } if game.id == id)
    }
}
