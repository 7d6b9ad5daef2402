//! Composition of filtering and sorting for presentation.

use std::sync::Arc;

use crate::collection::{GameFilterer, GameSorter};
use crate::memo::{fingerprint, MemoSlot};
use crate::models::{FilterAndSortOptions, GamePlus};

/// Filters and sorts a collection in one memoized step.
#[derive(Clone, Default)]
pub struct GamesFilterAndSorter {
    sorter: GameSorter,
    filterer: GameFilterer,
    cache: Arc<MemoSlot<Vec<GamePlus>>>,
}

impl GamesFilterAndSorter {
    /// Create a pipeline with fresh memo slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline from existing stages.
    pub fn with_stages(sorter: GameSorter, filterer: GameFilterer) -> Self {
        Self {
            sorter,
            filterer,
            cache: Arc::new(MemoSlot::new()),
        }
    }

    /// Return a filtered and sorted copy of `collection`.
    pub fn process(
        &self,
        collection: &[GamePlus],
        options: &FilterAndSortOptions,
    ) -> Vec<GamePlus> {
        let key = fingerprint(&(collection, options));
        self.cache.get_or_insert_with(key, || {
            let filtered = self.filterer.filter_collection(collection, options);
            self.sorter.sort_collection(&filtered, options.sort.as_ref())
        })
    }
}
