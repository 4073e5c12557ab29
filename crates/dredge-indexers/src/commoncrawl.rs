//! Indexer over the commoncrawl.org crawl data index.

use crate::pagedcdx::{CdxClient, CdxQuery};
use crate::{IndexBatch, Indexer, Result};
use async_trait::async_trait;
use dredge_core::ModuleArgs;

/// Registered plugin name.
pub const NAME: &str = "commoncrawl";

const DEFAULT_SERVER: &str = "https://index.commoncrawl.org";
const DEFAULT_API_SUFFIX: &str = "-index";

/// Searches commoncrawl.org crawl data for a domain's captured URLs.
///
/// When no index is named, the newest collection advertised by the server
/// is used and recorded in the batch's source label.
pub struct CommonCrawlIndexer {
    client: CdxClient,
    query: CdxQuery,
    index: Option<String>,
}

impl CommonCrawlIndexer {
    /// Construct the indexer from module arguments.
    ///
    /// Options: `domain` (required), `server`, `cdx-api-suffix`, `index`,
    /// `filter`, `retries`, `threads`.
    pub fn from_args(args: &ModuleArgs) -> Result<Self> {
        let domain = args.require("domain")?;
        let server = args.get_or("server", DEFAULT_SERVER);
        let api_suffix = args.get_or("cdx-api-suffix", DEFAULT_API_SUFFIX);
        let retries = args.get_parsed("retries", 10u32)?;
        let threads = args.get_parsed("threads", 10usize)?;

        Ok(Self {
            client: CdxClient::new(server, api_suffix, retries, threads),
            query: CdxQuery {
                domain,
                filter: args.get("filter").map(str::to_string),
                ..CdxQuery::default()
            },
            index: args.get("index").map(str::to_string),
        })
    }
}

/// Registry constructor.
pub fn build(args: &ModuleArgs) -> Result<Box<dyn Indexer>> {
    Ok(Box::new(CommonCrawlIndexer::from_args(args)?))
}

#[async_trait]
impl Indexer for CommonCrawlIndexer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self) -> Result<IndexBatch> {
        let index = match &self.index {
            Some(index) => index.clone(),
            None => self.client.latest_index().await?,
        };
        let urls = self.client.fetch_all(Some(&index), &self.query).await?;
        Ok(IndexBatch {
            urls,
            source: format!("{NAME},index:{index}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexError;

    fn args(raw: &[&str]) -> ModuleArgs {
        ModuleArgs::parse(&raw.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_build_requires_domain() {
        assert!(matches!(
            CommonCrawlIndexer::from_args(&args(&[])),
            Err(IndexError::Core(_))
        ));
    }

    #[test]
    fn test_explicit_index_is_kept() {
        let indexer = CommonCrawlIndexer::from_args(&args(&[
            "domain=example.com",
            "index=CC-MAIN-2026-26",
        ]))
        .expect("build indexer");
        assert_eq!(indexer.index.as_deref(), Some("CC-MAIN-2026-26"));
    }
}
