//! Narrowing a collection by playtime window and player-count fit.

use std::sync::Arc;

use crate::memo::{fingerprint, MemoSlot};
use crate::models::{FilterAndSortOptions, GamePlus, PlaytimeRange};

/// Filters a collection according to [`FilterAndSortOptions`].
///
/// Pure: always returns a new sequence and never mutates the input.
#[derive(Clone, Default)]
pub struct GameFilterer {
    cache: Arc<MemoSlot<Vec<GamePlus>>>,
}

impl GameFilterer {
    /// Create a filterer with an empty memo slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the playtime filter, then the player-count filter.
    pub fn filter_collection(
        &self,
        collection: &[GamePlus],
        options: &FilterAndSortOptions,
    ) -> Vec<GamePlus> {
        let key = fingerprint(&(collection, options));
        self.cache.get_or_insert_with(key, || {
            let mut filtered: Vec<GamePlus> = collection.to_vec();
            if let Some(playtime) = &options.playtime {
                filtered.retain(|game| fits_playtime(game, playtime));
            }
            if let Some(player_count) = options.player_count {
                filtered.retain(|game| fits_player_count(game, player_count));
            }
            filtered
        })
    }
}

/// Containment semantics: the game's whole playtime range must fit inside
/// the requested window, so a long game whose minimum fits but whose maximum
/// exceeds the window is rejected.
fn fits_playtime(game: &GamePlus, playtime: &PlaytimeRange) -> bool {
    let minimum = playtime.minimum.unwrap_or(0);
    let maximum = playtime.maximum.unwrap_or(u32::MAX);
    minimum <= game.game.min_playtime.unwrap_or(0)
        && game.game.max_playtime.unwrap_or(u32::MAX) <= maximum
}

fn fits_player_count(game: &GamePlus, player_count: u32) -> bool {
    let Some(min_players) = game.game.min_players else {
        return false;
    };
    let Some(max_players) = game.game.max_players else {
        return false;
    };
    min_players <= player_count && player_count <= max_players
}
