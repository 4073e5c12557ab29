//! Error types for the storage layer.

use thiserror::Error;

/// Central error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store address used an unsupported scheme.
    #[error("unsupported store address scheme: {0}")]
    UnsupportedScheme(String),

    /// Establishing the backend connection failed.
    #[error("failed to connect to store: {0}")]
    Connect(String),

    /// A statement failed fatally (non-retryable, or retries exhausted).
    #[error("store execution failed: {0}")]
    Execute(String),

    /// A fetched row could not be decoded.
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// A blocklist item did not match the `ip:`/`host:`/`regex:` syntax.
    #[error("could not parse blocklist item '{item}': {reason}")]
    BlocklistItem {
        /// The offending item
        item: String,
        /// Why it was rejected
        reason: String,
    },

    /// Errors bubbled up from the core crate (URL parsing and friends).
    #[error(transparent)]
    Core(#[from] dredge_core::CoreError),

    /// I/O errors from file-backed blocklists and store file handling.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;
