//! Configuration Module
//!
//! Resolves the store location and sweep interval from environment
//! variables or a settings map.

use std::env;
use std::io;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::cache::DEFAULT_STORE_PATH;

/// Connector configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the store file
    pub store: PathBuf,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_FILE` - Store file path
    /// - `CACHE_STORE` - Store file path, wins over `CACHE_FILE`
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        for name in ["CACHE_FILE", "CACHE_STORE"] {
            if let Some(path) = env::var(name).ok().filter(|v| !v.is_empty()) {
                config.store = PathBuf::from(path);
            }
        }

        if let Some(interval) = env::var("CLEANUP_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.cleanup_interval = interval;
        }

        config
    }

    /// Creates a Config from a host settings map.
    ///
    /// Recognizes the `file` and `store` keys; `store` wins when both are
    /// set. Empty or non-string values are ignored.
    pub fn from_settings(settings: &Map<String, Value>) -> Self {
        let mut config = Self::default();

        for name in ["file", "store"] {
            if let Some(path) = settings
                .get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
            {
                config.store = PathBuf::from(path);
            }
        }

        if let Some(interval) = settings.get("cleanup_interval").and_then(Value::as_u64) {
            config.cleanup_interval = interval;
        }

        config
    }

    /// Creates the directory that will hold the store file, if missing.
    pub fn ensure_store_dir(&self) -> io::Result<()> {
        let Some(dir) = self.store.parent().filter(|d| !d.as_os_str().is_empty()) else {
            return Ok(());
        };
        if dir.exists() {
            return Ok(());
        }

        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE_PATH),
            cleanup_interval: 1,
        }
    }
}
