//! Indexer reading newline-delimited URLs from standard input.

use crate::{IndexBatch, Indexer, Result};
use async_trait::async_trait;
use dredge_core::ModuleArgs;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Registered plugin name.
pub const NAME: &str = "stdin";

/// Feeds manually supplied URLs into the frontier.
pub struct StdinIndexer;

/// Registry constructor. Takes no options.
pub fn build(_args: &ModuleArgs) -> Result<Box<dyn Indexer>> {
    Ok(Box::new(StdinIndexer))
}

#[async_trait]
impl Indexer for StdinIndexer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self) -> Result<IndexBatch> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut urls = Vec::new();
        while let Some(line) = lines.next_line().await? {
            let url = line.trim();
            if !url.is_empty() {
                urls.push(url.to_string());
            }
        }
        tracing::info!(count = urls.len(), "read urls from stdin");
        Ok(IndexBatch {
            urls,
            source: NAME.to_string(),
        })
    }
}
