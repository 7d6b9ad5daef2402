//! Explicit argument-keyed caches used by the pure pipeline stages.
//!
//! The UI layer re-invokes merge/filter/sort with structurally identical
//! inputs on every refresh, so each call site keeps the last result behind a
//! structural fingerprint of its arguments.

use std::hash::{Hash, Hasher};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Structural fingerprint of any serializable value.
///
/// Goes through `serde_json::Value` so map keys are ordered before hashing;
/// equal values always fingerprint equally regardless of map iteration order.
pub(crate) fn fingerprint<T: Serialize>(value: &T) -> u64 {
    let canonical = serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}

/// Single-entry cache holding the result of the most recent distinct call.
///
/// Inputs are bounded per session, but a call site only ever re-asks with
/// its latest arguments, so one slot is all the history worth keeping.
pub(crate) struct MemoSlot<V> {
    slot: Mutex<Option<(u64, V)>>,
    #[cfg(test)]
    computes: AtomicUsize,
}

impl<V: Clone> MemoSlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            #[cfg(test)]
            computes: AtomicUsize::new(0),
        }
    }

    /// Return the cached value for `key`, or compute, store and return it.
    pub(crate) fn get_or_insert_with(&self, key: u64, compute: impl FnOnce() -> V) -> V {
        let mut slot = self.slot.lock();
        if let Some((cached_key, cached)) = slot.as_ref() {
            if *cached_key == key {
                return cached.clone();
            }
        }
        let value = compute();
        #[cfg(test)]
        self.computes.fetch_add(1, Ordering::Relaxed);
        *slot = Some((key, value.clone()));
        value
    }

    /// How many times the compute closure has run on this slot.
    #[cfg(test)]
    pub(crate) fn computes(&self) -> usize {
        self.computes.load(Ordering::Relaxed)
    }
}

impl<V: Clone> Default for MemoSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn equal_maps_fingerprint_equally() {
        let mut a = HashMap::new();
        a.insert("alice".to_string(), 1);
        a.insert("bob".to_string(), 2);
        let mut b = HashMap::new();
        b.insert("bob".to_string(), 2);
        b.insert("alice".to_string(), 1);

        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&HashMap::<String, i32>::new()));
    }

    #[test]
    fn slot_caches_last_key() {
        let slot = MemoSlot::new();
        let mut calls = 0;
        let mut run = |key| {
            slot.get_or_insert_with(key, || {
                calls += 1;
                key * 10
            })
        };
        assert_eq!(run(1), 10);
        assert_eq!(run(1), 10);
        assert_eq!(run(2), 20);
        drop(run);
        assert_eq!(calls, 2);
    }
}
