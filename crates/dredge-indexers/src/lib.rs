//! Dredge Indexers
//!
//! Indexer plugins discover candidate URLs and hand them to the frontier as
//! a batch tagged with a source label. An indexer must not mutate shared
//! state; transient HTTP failures are retried internally per request, and a
//! "no captures" page is tolerated rather than aborting the whole run.
//!
//! Plugins are looked up by name through the [`IndexerRegistry`], a static
//! registration table populated at program start.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commoncrawl;
pub mod pagedcdx;
pub mod stdin;
pub mod wayback;

use async_trait::async_trait;
use dredge_core::ModuleArgs;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by indexer plugins.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The requested indexer name is not registered.
    #[error("indexer module not found: {0}")]
    ModuleNotFound(String),

    /// An HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with something other than the expected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// A request kept failing past the retry bound.
    #[error("retries exceeded while {0}")]
    RetriesExceeded(String),

    /// Option parsing and URL errors from the core crate.
    #[error(transparent)]
    Core(#[from] dredge_core::CoreError),

    /// I/O errors (stdin input).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

/// One indexer run's output: discovered URLs plus the source label the
/// frontier files them under.
#[derive(Debug, Clone)]
pub struct IndexBatch {
    /// Candidate URLs, deduplicated by the indexer
    pub urls: Vec<String>,
    /// Source label (indexer name, possibly qualified by its options)
    pub source: String,
}

/// The indexer capability: discover candidate URLs.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// The plugin's registered name.
    fn name(&self) -> &'static str;

    /// Run the discovery and return the batch.
    async fn run(&self) -> Result<IndexBatch>;
}

type BuildFn = fn(&ModuleArgs) -> Result<Box<dyn Indexer>>;

/// Name-to-constructor table for indexer plugins.
pub struct IndexerRegistry {
    builders: HashMap<&'static str, BuildFn>,
}

impl IndexerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in indexers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(stdin::NAME, stdin::build);
        registry.register(wayback::NAME, wayback::build);
        registry.register(commoncrawl::NAME, commoncrawl::build);
        registry
    }

    /// Register a plugin constructor under a name.
    pub fn register(&mut self, name: &'static str, builder: BuildFn) {
        self.builders.insert(name, builder);
    }

    /// Construct the named plugin from its module arguments.
    ///
    /// # Errors
    /// Returns [`IndexError::ModuleNotFound`] for an unregistered name.
    pub fn build(&self, name: &str, args: &ModuleArgs) -> Result<Box<dyn Indexer>> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| IndexError::ModuleNotFound(name.to_string()))?;
        builder(args)
    }

    /// Registered plugin names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.builders.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for IndexerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
