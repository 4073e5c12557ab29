//! Dredge Scanners
//!
//! Scanner plugins probe a single target URL for vulnerabilities. Ordinary
//! scan failure is not an error: a scanner answers with
//! [`ScanOutcome::Failed`], the frontier writes no report, and the target
//! stays marked scanned (failed scans are not retried automatically).
//! Errors are reserved for plugin construction and lookup.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod process;

use async_trait::async_trait;
use dredge_core::{ModuleArgs, Target, Vulnerability};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced while setting up scanner plugins.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The requested scanner name is not registered.
    #[error("scanner module not found: {0}")]
    ModuleNotFound(String),

    /// Option parsing errors from the core crate.
    #[error(transparent)]
    Core(#[from] dredge_core::CoreError),
}

/// Result type alias using `ScanError`.
pub type Result<T> = std::result::Result<T, ScanError>;

/// What a scan invocation produced.
///
/// `Failed` is a sentinel, not an error: the fatal-vs-retryable distinction
/// is made explicit through this value rather than through exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The scan ran to completion (the list may be empty)
    Completed(Vec<Vulnerability>),
    /// The scan could not be completed
    Failed,
}

/// The scanner capability: probe one target.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// The plugin's registered name.
    fn name(&self) -> &'static str;

    /// Probe the target and report what was found.
    async fn scan(&self, target: &Target) -> ScanOutcome;
}

type BuildFn = fn(&ModuleArgs) -> Result<Box<dyn Scanner>>;

/// Name-to-constructor table for scanner plugins.
pub struct ScannerRegistry {
    builders: HashMap<&'static str, BuildFn>,
}

impl ScannerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in scanners.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(process::NAME, process::build);
        registry
    }

    /// Register a plugin constructor under a name.
    pub fn register(&mut self, name: &'static str, builder: BuildFn) {
        self.builders.insert(name, builder);
    }

    /// Construct the named plugin from its module arguments.
    ///
    /// # Errors
    /// Returns [`ScanError::ModuleNotFound`] for an unregistered name.
    pub fn build(&self, name: &str, args: &ModuleArgs) -> Result<Box<dyn Scanner>> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| ScanError::ModuleNotFound(name.to_string()))?;
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

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builtins() {
        let registry = ScannerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["process"]);
    }

    #[test]
    fn test_registry_unknown_module() {
        let registry = ScannerRegistry::with_builtins();
        let result = registry.build("arachni", &ModuleArgs::default());
        assert!(matches!(result, Err(ScanError::ModuleNotFound(name)) if name == "arachni"));
    }
}
