//! Configuration management for dredge.
//!
//! Provides TOML-based configuration with XDG-compliant paths. The config
//! file supplies defaults; command-line flags always win.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// Loaded from `~/.config/dredge/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Store address (`postgresql://…`, `sqlite3://…`, or a file path).
    /// Defaults to `dredge.db` inside the working directory when unset.
    pub database: Option<String>,
    /// Number of retries for failed storage operations
    pub retries: u32,
    /// Error substrings that should trigger a storage retry
    pub retry_on: Vec<String>,
    /// Supplemental blocklist files or store addresses
    pub external_blocklists: Vec<String>,
    /// Directory scan reports are written into
    pub report_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            retries: 3,
            retry_on: Vec::new(),
            external_blocklists: Vec::new(),
            report_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults
    /// if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined, or if
    /// the file exists but cannot be read or parsed.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            let contents = fs::read_to_string(&path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            tracing::debug!("config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Path to the configuration file (XDG base directories).
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("org", "dredge", "dredge").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
