//! Server configuration file handling.
//!
//! `palaver.json` is loaded if present and created with defaults on first
//! run, so a fresh checkout starts with a single command. Every field has
//! a serde default; partial config files are fine.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "palaver.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Admin account created interactively on first run. Empty disables
    /// provisioning.
    #[serde(default = "default_init_admin_username")]
    pub init_admin_username: String,

    /// History entries sent on login.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8765
}

fn default_database_path() -> PathBuf {
    PathBuf::from("messenger.db")
}

fn default_init_admin_username() -> String {
    "admin".into()
}

fn default_history_limit() -> u32 {
    80
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            init_admin_username: default_init_admin_username(),
            history_limit: default_history_limit(),
        }
    }
}

/// Load the config file, writing one with defaults if it doesn't exist.
pub fn load_or_create(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    } else {
        let config = AppConfig::default();
        let pretty = serde_json::to_string_pretty(&config).context("serialize default config")?;
        fs::write(path, pretty).with_context(|| format!("write config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("palaver-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("palaver.json")
    }

    #[test]
    fn creates_defaults_when_missing() {
        let path = temp_path();
        let config = load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.port, 8765);
        assert_eq!(config.init_admin_username, "admin");

        // second load reads the file it just wrote
        let again = load_or_create(&path).unwrap();
        assert_eq!(again.port, config.port);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let path = temp_path();
        std::fs::write(&path, r#"{"port": 9999}"#).unwrap();
        let config = load_or_create(&path).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.history_limit, 80);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let path = temp_path();
        std::fs::write(&path, "not json").unwrap();
        assert!(load_or_create(&path).is_err());
    }
}
