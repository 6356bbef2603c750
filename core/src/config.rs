//! TOML-backed runtime configuration.
//!
//! Scheduler intervals, retention windows, and scoring weights are fixed in
//! `constants` per the product contract; the config file only carries the
//! deployment-specific knobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::constants::defaults;

/// Environment variable pointing at the config file
pub const CONFIG_ENV: &str = "NODEPOOL_CONFIG";

/// Fallback config file path
pub const CONFIG_PATH: &str = "config/nodepool.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// User-Agent used when a subscription does not define its own
    #[serde(default = "default_user_agent")]
    pub default_user_agent: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Whether the background scheduler starts with the process
    #[serde(default = "default_scheduler_enabled")]
    pub scheduler_enabled: bool,
}

fn default_database_path() -> String {
    defaults::DATABASE_PATH.to_string()
}

fn default_user_agent() -> String {
    defaults::USER_AGENT.to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_scheduler_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_user_agent: default_user_agent(),
            fetch_timeout_seconds: default_fetch_timeout(),
            scheduler_enabled: default_scheduler_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from `NODEPOOL_CONFIG` or the default path,
    /// falling back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!("Config file '{}' not found, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path))?;

        info!("Configuration loaded from {}", path);
        Ok(config)
    }
}
