//! Application configuration management.
//!
//! Configuration is stored at `~/.config/spirits/config.json`. Every field
//! can be overridden from the environment (`SPIRITS_DATA_URL`,
//! `SPIRITS_DATA_FILE`, `SPIRITS_CACHE_DIR`, `SPIRITS_STORAGE`,
//! `SPIRITS_OFFLINE`), which the binary populates from `.env` first.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::selector::StorageMode;
use crate::sync::DataSource;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "spirits";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_DATA_URL: &str = "SPIRITS_DATA_URL";
pub const ENV_DATA_FILE: &str = "SPIRITS_DATA_FILE";
pub const ENV_CACHE_DIR: &str = "SPIRITS_CACHE_DIR";
pub const ENV_STORAGE: &str = "SPIRITS_STORAGE";
pub const ENV_OFFLINE: &str = "SPIRITS_OFFLINE";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// URL of the catalog CSV.
    pub data_url: Option<String>,
    /// Local catalog CSV, used inline in preference to `data_url`.
    pub data_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub storage: StorageMode,
    #[serde(default)]
    pub offline: bool,
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override fields from variables found by `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var(ENV_DATA_URL) {
            self.data_url = Some(url);
        }
        if let Some(file) = var(ENV_DATA_FILE) {
            self.data_file = Some(PathBuf::from(file));
        }
        if let Some(dir) = var(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(storage) = var(ENV_STORAGE) {
            self.storage = storage
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid {}", ENV_STORAGE))?;
        }
        if let Some(offline) = var(ENV_OFFLINE) {
            self.offline = parse_flag(&offline)
                .with_context(|| format!("Invalid {}: '{}'", ENV_OFFLINE, offline))?;
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// The configured catalog source, reading `data_file` if set.
    pub fn data_source(&self) -> Result<Option<DataSource>> {
        if let Some(ref file) = self.data_file {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read data file {}", file.display()))?;
            return Ok(Some(DataSource::Inline(text)));
        }
        Ok(self.data_url.clone().map(DataSource::Remote))
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage, StorageMode::Auto);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"data_url": "https://example.org/spirits.csv", "storage": "ephemeral"}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.data_url.as_deref(), Some("https://example.org/spirits.csv"));
        assert_eq!(config.storage, StorageMode::Ephemeral);
        assert!(!config.offline);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config {
            data_url: Some("https://example.org/old.csv".to_string()),
            ..Config::default()
        };
        config
            .apply_env(env(&[
                (ENV_DATA_URL, "https://example.org/new.csv"),
                (ENV_CACHE_DIR, "/tmp/spirits"),
                (ENV_STORAGE, "persistent"),
                (ENV_OFFLINE, "yes"),
                (ENV_DATA_FILE, " "),
            ]))
            .unwrap();

        assert_eq!(config.data_url.as_deref(), Some("https://example.org/new.csv"));
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/spirits"));
        assert_eq!(config.storage, StorageMode::Persistent);
        assert!(config.offline);
        assert_eq!(config.data_file, None);
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[(ENV_STORAGE, "cloud")])).is_err());
        assert!(config.apply_env(env(&[(ENV_OFFLINE, "maybe")])).is_err());
    }

    #[test]
    fn test_data_source_prefers_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spirits.csv");
        std::fs::write(&file, "firstname\nTohka\n").unwrap();

        let mut config = Config {
            data_url: Some("https://example.org/spirits.csv".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.data_source().unwrap(),
            Some(DataSource::Remote("https://example.org/spirits.csv".to_string()))
        );

        config.data_file = Some(file);
        assert_eq!(
            config.data_source().unwrap(),
            Some(DataSource::Inline("firstname\nTohka\n".to_string()))
        );

        config.data_file = Some(dir.path().join("missing.csv"));
        assert!(config.data_source().is_err());
        assert_eq!(Config::default().data_source().unwrap(), None);
    }
}
