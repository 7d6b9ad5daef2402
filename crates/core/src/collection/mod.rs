//! Merging, filtering and sorting of user collections.

/// Per-user collection merging.
pub mod merge;
/// Playtime and player-count filters.
pub mod filter;
/// Sort strategies and rank aggregation.
pub mod sort;
/// Filter + sort composition.
pub mod pipeline;

pub use filter::GameFilterer;
pub use merge::CollectionMerger;
pub use pipeline::GamesFilterAndSorter;
pub use sort::{resolve_sorter, GameSorter, MultiSorter, Sorter};
