//! Indexer over the archive.org crawl data CDX API.

use crate::pagedcdx::{CdxClient, CdxQuery};
use crate::{IndexBatch, Indexer, Result};
use async_trait::async_trait;
use dredge_core::ModuleArgs;

/// Registered plugin name.
pub const NAME: &str = "wayback";

const DEFAULT_SERVER: &str = "https://web.archive.org";
const DEFAULT_API_SUFFIX: &str = "/cdx/search/cdx";

/// Searches archive.org crawl data for a domain's captured URLs.
pub struct WaybackIndexer {
    client: CdxClient,
    query: CdxQuery,
    source: String,
}

impl WaybackIndexer {
    /// Construct the indexer from module arguments.
    ///
    /// Options: `domain` (required), `server`, `cdx-api-suffix`, `filter`,
    /// `from`, `to`, `retries`, `threads`.
    pub fn from_args(args: &ModuleArgs) -> Result<Self> {
        let domain = args.require("domain")?;
        let server = args.get_or("server", DEFAULT_SERVER);
        let api_suffix = args.get_or("cdx-api-suffix", DEFAULT_API_SUFFIX);
        let retries = args.get_parsed("retries", 10u32)?;
        let threads = args.get_parsed("threads", 10usize)?;
        let from = args.get("from").map(str::to_string);
        let to = args.get("to").map(str::to_string);

        let mut source = NAME.to_string();
        if let Some(from) = &from {
            source.push_str(&format!(",from:{from}"));
        }
        if let Some(to) = &to {
            source.push_str(&format!(",to:{to}"));
        }

        Ok(Self {
            client: CdxClient::new(server, api_suffix, retries, threads),
            query: CdxQuery {
                domain,
                filter: args.get("filter").map(str::to_string),
                from,
                to,
                collapse: Some("urlkey".to_string()),
            },
            source,
        })
    }

    /// The source label this run will file targets under.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Registry constructor.
pub fn build(args: &ModuleArgs) -> Result<Box<dyn Indexer>> {
    Ok(Box::new(WaybackIndexer::from_args(args)?))
}

#[async_trait]
impl Indexer for WaybackIndexer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self) -> Result<IndexBatch> {
        let urls = self.client.fetch_all(None, &self.query).await?;
        Ok(IndexBatch {
            urls,
            source: self.source.clone(),
        })
    }
}
