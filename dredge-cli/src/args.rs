//! Command-line argument surface.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Persistent crawl-target frontier for vulnerability scanning pipelines.
#[derive(Debug, Parser)]
#[command(name = "dredge", version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Dredge directory (default location of db and reports)
    #[arg(short = 'r', long, default_value = ".")]
    pub directory: PathBuf,

    /// Label associated with targets
    #[arg(long)]
    pub source: Option<String>,

    /// Number of targets to retrieve (0 = all)
    #[arg(long, default_value_t = 0)]
    pub count: u64,

    /// Retrieve targets in random order
    #[arg(long)]
    pub random: bool,

    /// Path to log file
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Enable verbose logging (can be used multiple times to increase verbosity)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    // database
    /// Database file/uri
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// Apply fingerprinting and blocklist without scanning
    #[arg(short = 'u', long)]
    pub prune: bool,

    /// Delete and recreate tables
    #[arg(long)]
    pub drop_tables: bool,

    /// Number of retries when an operation fails
    #[arg(long)]
    pub retries: Option<u32>,

    /// Error strings that should result in a retry (can be used multiple times)
    #[arg(long = "retry-on", value_name = "SUBSTRING")]
    pub retry_on: Vec<String>,

    /// Show the total/unscanned target and fingerprint counts
    #[arg(long)]
    pub show_stats: bool,

    // targets
    /// List targets in database
    #[arg(short = 'l', long)]
    pub list_targets: bool,

    /// Only include unscanned targets
    #[arg(short = 'n', long)]
    pub unscanned_only: bool,

    /// Include each target's source label when listing
    #[arg(long)]
    pub show_sources: bool,

    /// List sources in database
    #[arg(long)]
    pub list_sources: bool,

    /// Add a url to the target database
    #[arg(long, value_name = "TARGET")]
    pub add_target: Option<String>,

    /// Delete a url from the target database
    #[arg(long, value_name = "TARGET")]
    pub delete_target: Option<String>,

    /// Delete all targets
    #[arg(long)]
    pub flush_targets: bool,

    /// Delete target if an error is encountered while processing it
    #[arg(short = 'e', long)]
    pub delete_on_error: bool,

    // indexing
    /// Indexer module to use
    #[arg(short = 'i', long)]
    pub indexer: Option<String>,

    /// Pass a key=value argument to the indexer module (can be used multiple times)
    #[arg(short = 'o', long = "indexer-arg", value_name = "KEY=VALUE")]
    pub indexer_arg: Vec<String>,

    // scanning
    /// Scanner module to use
    #[arg(short = 's', long)]
    pub scanner: Option<String>,

    /// Pass a key=value argument to the scanner module (can be used multiple times)
    #[arg(short = 'p', long = "scanner-arg", value_name = "KEY=VALUE")]
    pub scanner_arg: Vec<String>,

    /// Fetch next scannable target but do not mark it scanned
    #[arg(short = 't', long)]
    pub test: bool,

    /// Reset scanned status of all targets
    #[arg(short = 'x', long)]
    pub reset_scanned: bool,

    /// Reset scanned status of the given target
    #[arg(long, value_name = "TARGET")]
    pub mark_unscanned: Option<String>,

    // fingerprints
    /// Generate fingerprints for all targets
    #[arg(short = 'g', long)]
    pub generate_fingerprints: bool,

    /// Delete all generated fingerprints
    #[arg(short = 'f', long)]
    pub flush_fingerprints: bool,

    /// Maximum matches per fingerprint before deleting new matches
    #[arg(long, default_value_t = 0)]
    pub fingerprint_max: u64,

    // blocklist
    /// List internal blocklist entries
    #[arg(long)]
    pub list_blocklist: bool,

    /// Add an ip/host/regex pattern to the internal blocklist
    #[arg(long, value_name = "ITEM")]
    pub add_blocklist_item: Option<String>,

    /// Delete an item from the internal blocklist
    #[arg(long, value_name = "ITEM")]
    pub delete_blocklist_item: Option<String>,

    /// Delete all internal blocklist items
    #[arg(long)]
    pub flush_blocklist: bool,

    /// Supplemental external blocklist file/db (can be used multiple times)
    #[arg(short = 'b', long = "external-blocklist", value_name = "ADDRESS")]
    pub external_blocklist: Vec<String>,
}

impl Cli {
    /// Whether any operation was requested at all.
    pub fn has_work(&self) -> bool {
        self.indexer.is_some()
            || self.prune
            || self.scanner.is_some()
            || self.list_targets
            || self.flush_targets
            || self.add_target.is_some()
            || self.delete_target.is_some()
            || self.list_blocklist
            || self.flush_blocklist
            || self.add_blocklist_item.is_some()
            || self.delete_blocklist_item.is_some()
            || self.flush_fingerprints
            || self.generate_fingerprints
            || self.reset_scanned
            || self.list_sources
            || self.show_stats
            || self.mark_unscanned.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_invocation() {
        let cli = Cli::parse_from([
            "dredge",
            "-d",
            "sqlite3://frontier.db",
            "-s",
            "process",
            "-p",
            "path=/usr/bin/probe",
            "-p",
            "label=nightly",
            "--count",
            "25",
        ]);
        assert_eq!(cli.database.as_deref(), Some("sqlite3://frontier.db"));
        assert_eq!(cli.scanner.as_deref(), Some("process"));
        assert_eq!(cli.scanner_arg.len(), 2);
        assert_eq!(cli.count, 25);
        assert!(cli.has_work());
    }

    #[test]
    fn test_no_work_requested() {
        let cli = Cli::parse_from(["dredge"]);
        assert!(!cli.has_work());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::parse_from(["dredge", "-v", "-v", "--show-stats"]);
        assert_eq!(cli.verbose, 2);
    }
}
