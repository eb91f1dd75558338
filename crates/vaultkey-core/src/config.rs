//! Application configuration management.
//!
//! This module handles loading and saving the client configuration,
//! which includes the API base URL override, the preferred storage mode
//! for the renewal credential, and the last used sign-in identifier.
//!
//! Configuration is stored at `~/.config/vaultkey/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::storage::StorageMode;

/// Application name used for config/data/cache directory paths
const APP_NAME: &str = "vaultkey";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default API base URL when no override is configured
pub const DEFAULT_API_BASE_URL: &str = "https://api.vaultkey.io";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// The "remember me" preference applied at the next sign-in.
    #[serde(default)]
    pub default_storage_mode: StorageMode,
    #[serde(default)]
    pub last_identifier: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Durable credential area, shared by every client instance.
    pub fn durable_storage_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
