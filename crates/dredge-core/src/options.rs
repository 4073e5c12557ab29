//! Shared `key=value` option parsing for indexer and scanner modules.
//!
//! Plugins receive their options on the command line as repeated
//! `key=value` arguments. Each plugin declares a typed options struct and
//! populates it from a [`ModuleArgs`] bag, applying its own defaults and
//! required-ness, so the untyped surface never leaks past construction.

use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// Parsed module arguments: a flat `key=value` map.
///
/// A bare `key` with no `=` is treated as a boolean flag set to `true`.
#[derive(Debug, Clone, Default)]
pub struct ModuleArgs {
    values: HashMap<String, String>,
}

impl ModuleArgs {
    /// Parse raw `key=value` argument strings.
    #[must_use]
    pub fn parse(args: &[String]) -> Self {
        let mut values = HashMap::new();
        for arg in args {
            match arg.split_once('=') {
                Some((key, value)) => values.insert(key.to_string(), value.to_string()),
                None => values.insert(arg.to_string(), "true".to_string()),
            };
        }
        Self { values }
    }

    /// Look up a raw option value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up an option, falling back to a default.
    #[must_use]
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Look up a required option.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidOption`] if the option is absent.
    pub fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| CoreError::InvalidOption {
                option: key.to_string(),
                reason: "required option not set".to_string(),
            })
    }

    /// Look up and parse an option, falling back to a default when absent.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidOption`] if the value does not parse.
    pub fn get_parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e| CoreError::InvalidOption {
                option: key.to_string(),
                reason: format!("{e}"),
            }),
        }
    }

    /// Whether a boolean flag was set.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1" | "yes"))
    }
}
