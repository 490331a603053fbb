//! Client configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! covers the backend base address and the keychain service name.
//!
//! Configuration is stored at `~/.config/parkmate/config.json`. The
//! `PARKMATE_API_URL` environment variable overrides the configured base
//! address.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config directory and keychain paths
const APP_NAME: &str = "parkmate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default backend base address, including the fixed `/api` prefix.
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Environment variable overriding the base address.
const BASE_URL_ENV: &str = "PARKMATE_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub keyring_service: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            keyring_service: APP_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config: Self = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config.base_url = url;
        }
        Ok(config)
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_carries_api_prefix() {
        let config = Config::default();
        assert!(config.base_url.ends_with("/api"));
        assert_eq!(config.keyring_service, "parkmate");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config {
            base_url: "https://parkmate.example.com/api".to_string(),
            keyring_service: "parkmate-staging".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.base_url, config.base_url);
        assert_eq!(parsed.keyring_service, config.keyring_service);
    }
}
