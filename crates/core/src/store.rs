//! Best-effort client-side cache storage.
//!
//! The loader treats persistence as optional: a store that fails to read or
//! write must never break the in-memory flow, so every implementation logs
//! and swallows its own I/O problems.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

/// Directory under the user's config dir holding the cache file.
pub const DEFAULT_STORE_DIR: &str = "geekshelf";

/// A plain string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str);
    /// Drop the entry stored under `key`, if any.
    fn remove(&self, key: &str);
}

/// In-memory store used by tests and as a no-persistence default.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// File-backed store keeping all entries in one JSON object file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) a store at the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("discarding unreadable cache file {}: {err}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Default location under the user's config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_STORE_DIR)
            .join("cache.json")
    }

    fn write_through(&self, entries: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("failed to create {}: {err}", parent.display());
                return;
            }
        }
        match serde_json::to_vec_pretty(entries) {
            Ok(serialized) => {
                if let Err(err) = fs::write(&self.path, serialized) {
                    warn!("failed to write {}: {err}", self.path.display());
                }
            }
            Err(err) => warn!("failed to serialize cache entries: {err}"),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.write_through(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.write_through(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get("collections"), None);
        store.set("collections", "{}");
        assert_eq!(store.get("collections").as_deref(), Some("{}"));
        store.remove("collections");
        assert_eq!(store.get("collections"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let store = JsonFileStore::new(&path);
        store.set("storageVersion", "2");
        store.set("extrainfo", "{\"1\":{}}");
        drop(store);

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("storageVersion").as_deref(), Some("2"));
        assert_eq!(reopened.get("extrainfo").as_deref(), Some("{\"1\":{}}"));

        reopened.remove("extrainfo");
        let reopened_again = JsonFileStore::new(&path);
        assert_eq!(reopened_again.get("extrainfo"), None);
    }

    #[test]
    fn unreadable_cache_file_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("collections"), None);
    }
}
