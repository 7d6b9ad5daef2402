//! Suggested-player-count vote tallies and their map-key serialization.

use std::collections::HashMap;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Vote tallies keyed by player count.
pub type SuggestedPlayersMap = HashMap<PlayerCount, PlayerVotes>;

/// Key of a suggested-players tally: an exact count, or the catch-all
/// bucket the remote source reports for "this many or more" players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerCount {
    /// Votes for exactly this many players.
    Exactly(u32),
    /// The open-ended catch-all bucket.
    Any,
}

/// Community votes on how well a game plays at one player count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerVotes {
    /// Votes calling this count the best way to play.
    pub best: u32,
    /// Votes calling this count recommended.
    pub recommended: u32,
    /// Votes calling this count not recommended.
    pub not_recommended: u32,
}

impl PlayerVotes {
    /// Total number of votes cast for this player count.
    pub fn total(&self) -> u32 {
        self.best + self.recommended + self.not_recommended
    }
}

// JSON object keys must be strings, so the player count serializes as
// `"4"` / `"any"` rather than as a tagged value.
impl Serialize for PlayerCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PlayerCount::Exactly(count) => serializer.collect_str(count),
            PlayerCount::Any => serializer.serialize_str("any"),
        }
    }
}

impl<'de> Deserialize<'de> for PlayerCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct KeyVisitor;

        impl de::Visitor<'_> for KeyVisitor {
            type Value = PlayerCount;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a player count or \"any\"")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value == "any" {
                    return Ok(PlayerCount::Any);
                }
                value
                    .parse::<u32>()
                    .map(PlayerCount::Exactly)
                    .map_err(|_| de::Error::custom(format!("invalid player count '{value}'")))
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}
