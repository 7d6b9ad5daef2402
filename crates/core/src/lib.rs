#![warn(clippy::all, missing_docs)]

//! Core pipeline for loading and consolidating boardgame collections.
//!
//! This crate fetches per-user collections, extended game metadata and play
//! history from a remote source behind the [`gateway::CollectionGateway`]
//! seam, merges them into one deduplicated view, and filters/sorts the
//! result for presentation. Frontends subscribe to incremental updates via
//! the [`loader::CollectionLoader`].

pub mod collection;
pub mod config;
pub mod gateway;
pub mod loader;
mod memo;
pub mod models;
pub mod store;

pub use collection::{CollectionMerger, GameFilterer, GameSorter, GamesFilterAndSorter};
pub use config::AppConfig;
pub use gateway::CollectionGateway;
pub use loader::{CollectionLoader, LoadingKind, LoadingStatus};
pub use models::{
    ExtendedGameRecord, FilterAndSortOptions, GameId, GamePlus, GameRecord, PlayRecord,
    SortOption, SortSelection,
};
