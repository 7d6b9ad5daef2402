//! Sort strategies over merged collections.
//!
//! Every sorter is a total order implemented with the standard stable sort,
//! so tied records keep their relative input order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::memo::{fingerprint, MemoSlot};
use crate::models::{GameId, GamePlus, PlayerCount, SortOption, SortSelection};

/// Ranks a collection in place by one criterion.
pub trait Sorter: Send + Sync {
    /// Reorder `games` according to this sorter's criterion.
    fn sort(&self, games: &mut [GamePlus]);
}

/// Descending by community average rating.
pub struct RatingSorter;

impl Sorter for RatingSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| b.game.average_rating.total_cmp(&a.game.average_rating));
    }
}

/// Ascending by name, compared case-insensitively.
pub struct NameSorter;

impl Sorter for NameSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            a.game
                .name
                .to_lowercase()
                .cmp(&b.game.name.to_lowercase())
        });
    }
}

/// Descending by publication year; games without a year sort last.
pub struct NewestSorter;

impl Sorter for NewestSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            let a_year = a.game.year_published.unwrap_or(i32::MIN);
            let b_year = b.game.year_published.unwrap_or(i32::MIN);
            b_year.cmp(&a_year)
        });
    }
}

/// Ascending by publication year; games without a year sort last.
pub struct OldestSorter;

impl Sorter for OldestSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            let a_year = a.game.year_published.unwrap_or(i32::MAX);
            let b_year = b.game.year_published.unwrap_or(i32::MAX);
            a_year.cmp(&b_year)
        });
    }
}

/// Descending by the owners' average rating; unrated games sort last.
pub struct UserRatingSorter;

impl Sorter for UserRatingSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            let a_rating = a.game.average_user_rating().unwrap_or(0.0);
            let b_rating = b.game.average_user_rating().unwrap_or(0.0);
            b_rating.total_cmp(&a_rating)
        });
    }
}

/// Descending by complexity weight; games without a weight sort last.
pub struct HeavySorter;

impl Sorter for HeavySorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            b.weight()
                .unwrap_or(0.0)
                .total_cmp(&a.weight().unwrap_or(0.0))
        });
    }
}

/// Ascending by complexity weight; games without a weight sort last.
pub struct LightSorter;

impl Sorter for LightSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| {
            a.weight()
                .unwrap_or(99.0)
                .total_cmp(&b.weight().unwrap_or(99.0))
        });
    }
}

/// Most recently played first; never-played games sort last.
pub struct PlayedRecentlySorter;

impl Sorter for PlayedRecentlySorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| b.last_played().cmp(&a.last_played()));
    }
}

/// Least recently played first; never-played games sort first.
pub struct PlayedLongAgoSorter;

impl Sorter for PlayedLongAgoSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| a.last_played().cmp(&b.last_played()));
    }
}

/// Most plays first.
pub struct PlayedALotSorter;

impl Sorter for PlayedALotSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| b.play_count().cmp(&a.play_count()));
    }
}

/// Fewest plays first.
pub struct PlayedNotALotSorter;

impl Sorter for PlayedNotALotSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        games.sort_by(|a, b| a.play_count().cmp(&b.play_count()));
    }
}

/// Best community fit for a given player count first.
///
/// Without a player count the sorter is the identity.
pub struct SuggestedPlayersSorter {
    /// Player count to score against.
    pub player_count: Option<u32>,
}

impl SuggestedPlayersSorter {
    fn score(player_count: u32, game: &GamePlus) -> f64 {
        let Some(extra) = &game.extra else {
            return f64::NEG_INFINITY;
        };
        let votes = extra
            .suggested_players
            .get(&PlayerCount::Exactly(player_count))
            .or_else(|| extra.suggested_players.get(&PlayerCount::Any));
        match votes {
            Some(votes) if votes.total() > 0 => {
                let total = f64::from(votes.total());
                f64::from(votes.best) / total * 3.0 + f64::from(votes.recommended) / total
                    - f64::from(votes.not_recommended) / total * 2.0
            }
            // A tally with zero votes carries no signal either.
            _ => f64::NEG_INFINITY,
        }
    }
}

impl Sorter for SuggestedPlayersSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        let Some(player_count) = self.player_count else {
            return;
        };
        games.sort_by(|a, b| {
            Self::score(player_count, b).total_cmp(&Self::score(player_count, a))
        });
    }
}

/// Combines several sorters into one Borda-style ranked merge.
///
/// Each inner sorter ranks a private copy of the collection; a game's
/// combined score is the sum of its 0-based rank positions, lower first.
/// Ties fall back to the first inner sorter's rank, preserving the primary
/// criterion's order.
pub struct MultiSorter {
    inner: Vec<Arc<dyn Sorter>>,
}

impl MultiSorter {
    /// Build a ranked merge over the given sorters.
    pub fn new(inner: Vec<Arc<dyn Sorter>>) -> Self {
        Self { inner }
    }
}

impl Sorter for MultiSorter {
    fn sort(&self, games: &mut [GamePlus]) {
        if self.inner.is_empty() {
            return;
        }

        let mut ranks: HashMap<GameId, Vec<usize>> = HashMap::with_capacity(games.len());
        for sorter in &self.inner {
            let mut copy = games.to_vec();
            sorter.sort(&mut copy);
            for (position, game) in copy.iter().enumerate() {
                ranks.entry(game.game.id).or_default().push(position);
            }
        }

        games.sort_by(|a, b| {
            let a_ranks = &ranks[&a.game.id];
            let b_ranks = &ranks[&b.game.id];
            let a_score: usize = a_ranks.iter().sum();
            let b_score: usize = b_ranks.iter().sum();
            match a_score.cmp(&b_score) {
                Ordering::Equal => a_ranks[0].cmp(&b_ranks[0]),
                unequal => unequal,
            }
        });
    }
}

static SORTER_CACHE: Lazy<Mutex<HashMap<SortSelection, Arc<dyn Sorter>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve a sort selection into a sorter instance.
///
/// Defaults to [`RatingSorter`] when no selection is given; a list of
/// criteria resolves to a [`MultiSorter`]. Resolved sorters are cached since
/// callers re-ask with structurally equal selections on every refresh.
pub fn resolve_sorter(selection: Option<&SortSelection>) -> Arc<dyn Sorter> {
    let selection = selection
        .cloned()
        .unwrap_or(SortSelection::Single(SortOption::BggRating));

    let mut cache = SORTER_CACHE.lock();
    if let Some(sorter) = cache.get(&selection) {
        return Arc::clone(sorter);
    }
    let sorter = build_sorter(&selection);
    cache.insert(selection, Arc::clone(&sorter));
    sorter
}

fn build_sorter(selection: &SortSelection) -> Arc<dyn Sorter> {
    match selection {
        SortSelection::Single(option) => build_single(option),
        SortSelection::Multiple(options) => {
            Arc::new(MultiSorter::new(options.iter().map(build_single).collect()))
        }
    }
}

fn build_single(option: &SortOption) -> Arc<dyn Sorter> {
    match option {
        SortOption::Alphabetic => Arc::new(NameSorter),
        SortOption::BggRating => Arc::new(RatingSorter),
        SortOption::New => Arc::new(NewestSorter),
        SortOption::Old => Arc::new(OldestSorter),
        SortOption::UserRating => Arc::new(UserRatingSorter),
        SortOption::WeightHeavy => Arc::new(HeavySorter),
        SortOption::WeightLight => Arc::new(LightSorter),
        SortOption::PlayedRecently => Arc::new(PlayedRecentlySorter),
        SortOption::PlayedLongAgo => Arc::new(PlayedLongAgoSorter),
        SortOption::PlayedALot => Arc::new(PlayedALotSorter),
        SortOption::PlayedNotALot => Arc::new(PlayedNotALotSorter),
        SortOption::SuggestedPlayers { number_of_players } => Arc::new(SuggestedPlayersSorter {
            player_count: *number_of_players,
        }),
    }
}

/// Memoized front door for sorting a collection by a selection.
#[derive(Clone, Default)]
pub struct GameSorter {
    cache: Arc<MemoSlot<Vec<GamePlus>>>,
}

impl GameSorter {
    /// Create a sorter with an empty memo slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a sorted copy of `collection`; the input is never mutated.
    pub fn sort_collection(
        &self,
        collection: &[GamePlus],
        selection: Option<&SortSelection>,
    ) -> Vec<GamePlus> {
        let key = fingerprint(&(collection, selection));
        self.cache.get_or_insert_with(key, || {
            let sorter = resolve_sorter(selection);
            let mut sorted = collection.to_vec();
            sorter.sort(&mut sorted);
            sorted
        })
    }
}
