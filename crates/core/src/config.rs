//! Application configuration.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory name under the user's config dir.
pub const CONFIG_DIR: &str = "geekshelf";
/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// User-tunable settings for the collection loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Usernames whose collections are loaded when none are given explicitly.
    pub usernames: Vec<String>,
    /// Whether fetched collections and extended info are cached locally.
    pub use_cache: bool,
    /// Directory holding the local cache file.
    pub cache_root: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            usernames: Vec::new(),
            use_cache: true,
            cache_root: default_config_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and `GEEKSHELF_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(config_file_path())
    }

    /// Load configuration from a specific file path plus env overrides.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let defaults = AppConfig::default();
        let settings = config::Config::builder()
            .set_default("usernames", defaults.usernames.clone())?
            .set_default("use_cache", defaults.use_cache)?
            .set_default(
                "cache_root",
                defaults.cache_root.to_string_lossy().to_string(),
            )?
            .add_source(config::File::from(path.clone()).required(false))
            .add_source(config::Environment::with_prefix("GEEKSHELF"))
            .build()
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        settings
            .try_deserialize()
            .context("failed to parse configuration")
    }
}

/// Write a default config file when none exists yet.
pub fn ensure_default_config() -> Result<()> {
    let path = config_file_path();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered =
        toml_render(&AppConfig::default()).context("failed to render default configuration")?;
    fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

fn toml_render(config: &AppConfig) -> Result<String> {
    // Hand-rendered so the file carries comments; the shape stays trivial.
    Ok(format!(
        "# Usernames whose collections load by default.\nusernames = {usernames}\n\n\
         # Cache fetched collections and extended info locally.\nuse_cache = {use_cache}\n\n\
         # Directory holding the local cache file.\ncache_root = {cache_root:?}\n",
        usernames = serde_json::to_string(&config.usernames)?,
        use_cache = config.use_cache,
        cache_root = config.cache_root.to_string_lossy(),
    ))
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Absolute path of the config file.
pub fn config_file_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("missing.toml")).unwrap();
        assert!(config.usernames.is_empty());
        assert!(config.use_cache);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "usernames = [\"alice\", \"bob\"]\nuse_cache = false\ncache_root = \"/tmp/shelf\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.usernames, vec!["alice", "bob"]);
        assert!(!config.use_cache);
        assert_eq!(config.cache_root, PathBuf::from("/tmp/shelf"));
    }

    #[test]
    fn default_render_parses_back() {
        let rendered = toml_render(&AppConfig::default()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, rendered).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert!(config.use_cache);
    }
}
