//! Core error types shared across the dredge crates.

use thiserror::Error;

/// Central error type for core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A URL could not be parsed.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL string
        url: String,
        /// Parser diagnostic
        reason: String,
    },

    /// A module option was missing or malformed.
    #[error("invalid module option '{option}': {reason}")]
    InvalidOption {
        /// Option name
        option: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Configuration errors (file loading, parsing, validation).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Report serialization or write failures.
    #[error("failed to write report: {0}")]
    Report(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path.
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// I/O error reading config.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
