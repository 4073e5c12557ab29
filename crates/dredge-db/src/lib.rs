//! Dredge Storage Layer
//!
//! The persistent target frontier: a deduplicating, filterable work queue
//! over SQLite or PostgreSQL, selected by store address scheme.
//!
//! # Architecture
//!
//! - **Retryable execution**: every statement runs through a
//!   single-connection executor with bounded retry and exponential backoff
//! - **Structural dedup**: targets are grouped into fingerprint classes and
//!   at most one member per class is ever dispatched to a scanner
//! - **Blocklists**: IP/host/regex exclusion rules, file- or store-backed,
//!   screened at enqueue and again at dequeue
//! - **Multi-process safety**: concurrent workers race on an atomic
//!   claim-by-update; the backing store's transactions decide the winner
//!
//! # Example
//!
//! ```ignore
//! use dredge_db::{DequeueOptions, StoreOptions, TargetStore};
//!
//! let store = TargetStore::open("sqlite3://frontier.db", &StoreOptions::default()).await?;
//! store.add_target("http://example.com/p?id=1", Some("manual"), &[]).await?;
//! while let Some(target) = store.get_next_target(&[], &DequeueOptions::default()).await? {
//!     // hand the target to a scanner
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod blocklist;
pub mod error;
pub mod executor;
pub mod frontier;

// Re-export commonly used types
pub use blocklist::{BlockMatch, Blocklist};
pub use error::{Result, StoreError};
pub use executor::{Backend, SqlDialect, StoreAddress, StoreExecutor};
pub use frontier::{
    DequeueOptions, ListOptions, PruneOptions, StoreOptions, TargetRow, TargetStore,
};
