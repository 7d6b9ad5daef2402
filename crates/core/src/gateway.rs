//! The remote-source seam the load orchestrator drives.
//!
//! Concrete gateways own the transport (HTTP, fixtures, caches) and collapse
//! transport or parse failures into the retry signals below; the orchestrator
//! never sees a hard error, only "not ready yet".

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ExtendedGameRecord, GameId, GameRecord, PlayRecord, UserValidity};

/// Failure inside a gateway implementation.
///
/// Carried as data in [`UserValidity::Unknown`]; for the fetch operations the
/// gateway folds these into a pending/retry-later signal instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a usable response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The response arrived but could not be interpreted.
    #[error("unreadable payload: {0}")]
    Parse(String),
}

/// Result of asking for a user's collection.
#[derive(Debug, Clone)]
pub enum CollectionResponse {
    /// The collection, fully assembled.
    Ready(Vec<GameRecord>),
    /// The source accepted the request but has no data yet.
    Pending {
        /// The source is additionally rate-limiting us.
        backoff: bool,
    },
}

/// Result of asking for a batch of extended game info.
#[derive(Debug, Clone)]
pub enum ExtendedInfoResponse {
    /// One entry per requested id, in request order.
    Ready(Vec<ExtendedGameRecord>),
    /// Ask again later.
    RetryLater {
        /// The source is additionally rate-limiting us.
        backoff: bool,
    },
}

/// Result of asking for a user's play history.
#[derive(Debug, Clone)]
pub enum PlaysResponse {
    /// The full play list; the gateway assembles pages internally.
    Ready(Vec<PlayRecord>),
    /// The source accepted the request but has no data yet.
    Pending {
        /// The source is additionally rate-limiting us.
        backoff: bool,
    },
}

/// Capability to fetch collection, game and play data from the remote source.
#[async_trait]
pub trait CollectionGateway: Send + Sync {
    /// Fetch the list of games a user owns.
    async fn fetch_collection(&self, username: &str) -> CollectionResponse;

    /// Check whether a username exists at the remote source.
    async fn fetch_user_validity(&self, username: &str) -> UserValidity;

    /// Fetch extended info for a batch of game ids.
    ///
    /// A `Ready` response is index-aligned with `ids`.
    async fn fetch_extended_info(&self, ids: &[GameId]) -> ExtendedInfoResponse;

    /// Fetch a user's complete play history.
    async fn fetch_plays(&self, username: &str) -> PlaysResponse;
}
