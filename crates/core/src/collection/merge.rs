//! Deduplicating merge of several users' collections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::memo::{fingerprint, MemoSlot};
use crate::models::{GameId, GameRecord};

/// Collections keyed by the username that reported them.
///
/// A `BTreeMap` so iteration (and therefore owner order and merge output) is
/// deterministic for a given set of usernames.
pub type CollectionMap = BTreeMap<String, Vec<GameRecord>>;

/// Merges multiple per-user collections into one deduplicated collection.
///
/// Pure: inputs are never mutated, and equal inputs produce equal outputs.
/// The most recent distinct input is memoized since the presentation layer
/// re-asks with identical maps on every refresh.
#[derive(Clone, Default)]
pub struct CollectionMerger {
    cache: Arc<MemoSlot<Vec<GameRecord>>>,
}

impl CollectionMerger {
    /// Create a merger with an empty memo slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the given collections into a single game list.
    ///
    /// The first occurrence of a game id creates the merged record with
    /// `owners = [username]`; later occurrences append the username and fold
    /// their `user_rating` entries in (incoming wins on a shared key).
    /// Output order is the order ids were first encountered.
    pub fn merge(&self, collections: &CollectionMap) -> Vec<GameRecord> {
        let key = fingerprint(collections);
        self.cache
            .get_or_insert_with(key, || merge_uncached(collections))
    }
}

fn merge_uncached(collections: &CollectionMap) -> Vec<GameRecord> {
    let mut merged: HashMap<GameId, GameRecord> = HashMap::new();
    let mut first_seen: Vec<GameId> = Vec::new();

    for (username, games) in collections {
        for game in games {
            match merged.get_mut(&game.id) {
                Some(known) => {
                    if !known.owners.iter().any(|owner| owner == username) {
                        known.owners.push(username.clone());
                    }
                    if let Some(incoming) = &game.user_rating {
                        let ratings = known.user_rating.get_or_insert_with(HashMap::new);
                        for (user, score) in incoming {
                            ratings.insert(user.clone(), *score);
                        }
                    }
                }
                None => {
                    let mut record = game.clone();
                    record.owners = vec![username.clone()];
                    merged.insert(game.id, record);
                    first_seen.push(game.id);
                }
            }
        }
    }

    first_seen
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameRecord;

    fn game(id: GameId, name: &str) -> GameRecord {
        GameRecord {
            id,
            name: name.to_string(),
            thumbnail_url: String::new(),
            image_url: String::new(),
            year_published: None,
            min_players: None,
            max_players: None,
            min_playtime: None,
            max_playtime: None,
            playing_time: None,
            average_rating: 0.0,
            families: Vec::new(),
            owners: Vec::new(),
            user_rating: None,
        }
    }

    fn rated(id: GameId, name: &str, user: &str, score: Option<f64>) -> GameRecord {
        let mut record = game(id, name);
        let mut ratings = HashMap::new();
        ratings.insert(user.to_string(), score);
        record.user_rating = Some(ratings);
        record
    }

    #[test]
    fn accumulates_owners_and_ratings() {
        let mut collections = CollectionMap::new();
        collections.insert("alice".to_string(), vec![rated(1, "Agricola", "alice", Some(8.0))]);
        collections.insert("bob".to_string(), vec![rated(1, "Agricola", "bob", None)]);

        let merged = CollectionMerger::new().merge(&collections);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].owners, vec!["alice", "bob"]);
        let ratings = merged[0].user_rating.as_ref().unwrap();
        assert_eq!(ratings["alice"], Some(8.0));
        assert_eq!(ratings["bob"], None);

        // Inputs are untouched by the merge.
        assert_eq!(collections["alice"][0].owners, Vec::<String>::new());
        assert_eq!(collections["alice"][0].user_rating.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn incoming_rating_wins_on_collision() {
        let mut collections = CollectionMap::new();
        collections.insert("alice".to_string(), vec![rated(1, "Ra", "shared", Some(5.0))]);
        collections.insert("bob".to_string(), vec![rated(1, "Ra", "shared", Some(9.0))]);

        let merged = CollectionMerger::new().merge(&collections);
        assert_eq!(merged[0].user_rating.as_ref().unwrap()["shared"], Some(9.0));
    }

    #[test]
    fn output_order_is_first_encounter() {
        let mut collections = CollectionMap::new();
        collections.insert(
            "alice".to_string(),
            vec![game(3, "Azul"), game(1, "Agricola")],
        );
        collections.insert("bob".to_string(), vec![game(2, "Brass"), game(3, "Azul")]);

        let merged = CollectionMerger::new().merge(&collections);
        let ids: Vec<GameId> = merged.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut collections = CollectionMap::new();
        collections.insert("alice".to_string(), vec![rated(1, "Ra", "alice", Some(7.5))]);
        collections.insert("bob".to_string(), vec![game(2, "Brass")]);

        let merger = CollectionMerger::new();
        let first = merger.merge(&collections);
        let second = merger.merge(&collections);
        assert_eq!(first, second);

        // A fresh merger (cold cache) agrees as well.
        assert_eq!(CollectionMerger::new().merge(&collections), first);
    }
}
