//! Shared client for paged CDX-style crawl indexes.
//!
//! Both supported web archives expose the same protocol: an optional
//! collection listing (`collinfo.json`), a page-count probe
//! (`showNumPages=true`), and numbered result pages of JSON lines. Pages
//! are fetched concurrently up to a thread cap; each request retries with
//! jittered exponential backoff, and a 404 "no captures" page yields an
//! empty page rather than failing the run.

use crate::{IndexError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Query parameters shared by one indexer run.
#[derive(Debug, Clone, Default)]
pub struct CdxQuery {
    /// Pull all results for this domain or subdomain
    pub domain: String,
    /// Optional query filter passed through to the index
    pub filter: Option<String>,
    /// Beginning timestamp
    pub from: Option<String>,
    /// End timestamp
    pub to: Option<String>,
    /// Capture-collapsing rule (e.g. `urlkey`)
    pub collapse: Option<String>,
}

impl CdxQuery {
    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("url".to_string(), format!("*.{}", self.domain)),
            ("output".to_string(), "json".to_string()),
        ];
        if let Some(filter) = &self.filter {
            params.push(("filter".to_string(), filter.clone()));
        }
        if let Some(from) = &self.from {
            params.push(("from".to_string(), from.clone()));
        }
        if let Some(to) = &self.to {
            params.push(("to".to_string(), to.clone()));
        }
        if let Some(collapse) = &self.collapse {
            params.push(("collapse".to_string(), collapse.clone()));
        }
        params
    }
}

/// HTTP client for one CDX server.
pub struct CdxClient {
    http: reqwest::Client,
    server: String,
    api_suffix: String,
    retries: u32,
    threads: usize,
}

impl CdxClient {
    /// Build a client for `server`, with `api_suffix` appended after the
    /// (optional) index segment.
    #[must_use]
    pub fn new(server: String, api_suffix: String, retries: u32, threads: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            server,
            api_suffix,
            retries: retries.max(1),
            threads: threads.max(1),
        }
    }

    fn base_url(&self, index: Option<&str>) -> String {
        match index {
            Some(index) => format!("{}/{}{}", self.server, index, self.api_suffix),
            None => format!("{}{}", self.server, self.api_suffix),
        }
    }

    /// Discover the newest index collection advertised by the server.
    pub async fn latest_index(&self) -> Result<String> {
        let url = format!("{}/collinfo.json", self.server);
        tracing::debug!("fetching latest index list");
        let listing = self.get_json(&url, "fetching index list").await?;
        parse_index_listing(&listing).ok_or_else(|| {
            IndexError::Protocol("index listing contained no collections".to_string())
        })
    }

    /// Probe how many result pages the query spans.
    pub async fn page_count(&self, index: Option<&str>, query: &CdxQuery) -> Result<u64> {
        let mut params = query.params();
        params.push(("showNumPages".to_string(), "true".to_string()));
        let url = self.base_url(index);

        tracing::debug!("fetching number of pages");
        let mut attempt = 0u32;
        let value = loop {
            let response = self.http.get(&url).query(&params).send().await;
            match check(response).await {
                Ok(body) => match serde_json::from_str::<Value>(&body) {
                    Ok(value) => break value,
                    Err(error) => {
                        return Err(IndexError::Protocol(format!(
                            "page count was not JSON: {error}"
                        )))
                    }
                },
                Err(error) if attempt + 1 < self.retries => {
                    tracing::warn!(%error, "failed to fetch number of pages (will retry)");
                    jittered_backoff(attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to fetch number of pages (retries exceeded)");
                    return Err(IndexError::RetriesExceeded(
                        "fetching number of pages".to_string(),
                    ));
                }
            }
        };

        let pages = value
            .get("pages")
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexError::Protocol("page count missing 'pages' field".to_string()))?;
        tracing::debug!(pages, "got page count");
        Ok(pages)
    }

    /// Fetch one result page and return its in-scope URLs.
    ///
    /// A 404 means the page holds no captures; it logs and yields an empty
    /// set instead of counting against the run.
    pub async fn fetch_page(
        &self,
        index: Option<&str>,
        query: &CdxQuery,
        domain_filter: &Regex,
        page: u64,
    ) -> Result<HashSet<String>> {
        let mut params = query.params();
        params.push(("page".to_string(), page.to_string()));
        let url = self.base_url(index);

        tracing::debug!(page, "fetching page");
        let mut attempt = 0u32;
        loop {
            let response = self.http.get(&url).query(&params).send().await;
            match check_page(response).await {
                Ok(Some(body)) => return Ok(parse_page_lines(&body, domain_filter)),
                Ok(None) => {
                    tracing::warn!(page, "no captures for page");
                    return Ok(HashSet::new());
                }
                Err(error) if attempt + 1 < self.retries => {
                    tracing::warn!(page, %error, "failed to fetch results (will retry)");
                    jittered_backoff(attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(page, %error, "failed to fetch results (retries exceeded)");
                    return Err(IndexError::RetriesExceeded(format!("fetching page {page}")));
                }
            }
        }
    }

    /// Fetch every page concurrently and union the results.
    pub async fn fetch_all(&self, index: Option<&str>, query: &CdxQuery) -> Result<Vec<String>> {
        let pages = self.page_count(index, query).await?;
        let domain_filter = domain_filter(&query.domain)?;

        let page_sets: Vec<HashSet<String>> = stream::iter(
            (0..pages).map(|page| self.fetch_page(index, query, &domain_filter, page)),
        )
        .buffer_unordered(self.threads)
        .try_collect()
        .await?;

        let mut results = HashSet::new();
        for set in page_sets {
            results.extend(set);
        }
        let results: Vec<String> = results.into_iter().collect();
        tracing::info!(count = results.len(), "fetched results");
        Ok(results)
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            let response = self.http.get(url).send().await;
            match check(response).await {
                Ok(body) => {
                    return serde_json::from_str(&body).map_err(|error| {
                        IndexError::Protocol(format!("{what}: response was not JSON: {error}"))
                    })
                }
                Err(error) if attempt + 1 < self.retries => {
                    tracing::warn!(%error, what, "request failed (will retry)");
                    jittered_backoff(attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(%error, what, "request failed (retries exceeded)");
                    return Err(IndexError::RetriesExceeded(what.to_string()));
                }
            }
        }
    }
}

async fn check(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<String> {
    let response = response?.error_for_status()?;
    Ok(response.text().await?)
}

/// Like [`check`], but a 404 resolves to `Ok(None)` ("no captures").
async fn check_page(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<Option<String>> {
    let response = response?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response.error_for_status()?;
    Ok(Some(response.text().await?))
}

/// Only keep results that really belong to the requested domain; wildcard
/// index queries are allowed to over-match.
fn domain_filter(domain: &str) -> Result<Regex> {
    Regex::new(&format!(
        r"^https?://([^/.]*\.)*{}(/|$)",
        regex::escape(domain)
    ))
    .map_err(|error| IndexError::Protocol(format!("bad domain filter: {error}")))
}

fn parse_page_lines(body: &str, domain_filter: &Regex) -> HashSet<String> {
    let mut results = HashSet::new();
    for line in body.lines() {
        let Ok(item) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(url) = item.get("url").and_then(Value::as_str) else {
            continue;
        };
        let url = url.trim();
        if domain_filter.is_match(url) {
            results.insert(url.to_string());
        }
    }
    results
}

/// Pull the newest collection id out of a `collinfo.json` payload.
///
/// Handles both shapes in the wild: a plain list of collections with `id`
/// fields, and an object with `fixed`/`dynamic` collection arrays.
fn parse_index_listing(listing: &Value) -> Option<String> {
    if let Some(collections) = listing.as_array() {
        return collections.first().and_then(collection_id);
    }
    for key in ["fixed", "dynamic"] {
        if let Some(first) = listing.get(key).and_then(Value::as_array).and_then(|a| a.first()) {
            return collection_id(first);
        }
    }
    None
}

fn collection_id(collection: &Value) -> Option<String> {
    match collection {
        Value::String(id) => Some(id.clone()),
        other => other
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

async fn jittered_backoff(attempt: u32) {
    let floor = u64::from(attempt);
    let ceiling = (1u64 << attempt.min(16)).max(floor + 1);
    let secs = rand::thread_rng().gen_range(floor..ceiling);
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
