//! The [`Target`] value object: a candidate URL to be scanned.

use crate::error::Result;
use crate::fingerprint::{content_hash, parse_url};
use once_cell::sync::OnceCell;
use std::net::IpAddr;
use url::Url;

/// A candidate URL plus lazily computed host, IP address, and content hash.
///
/// The blocklist matcher consults the host and IP; scanner plugins and the
/// report writer use the content hash. IP resolution is best-effort: a
/// hostname that does not resolve simply yields `None`, it is never fatal.
#[derive(Debug, Clone)]
pub struct Target {
    url: String,
    parsed: Url,
    ip: tokio::sync::OnceCell<Option<IpAddr>>,
    hash: OnceCell<String>,
}

impl Target {
    /// Parse a URL into a target.
    ///
    /// # Errors
    /// Returns [`crate::CoreError::InvalidUrl`] if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self> {
        let parsed = parse_url(url)?;
        Ok(Self {
            url: url.to_string(),
            parsed,
            ip: tokio::sync::OnceCell::new(),
            hash: OnceCell::new(),
        })
    }

    /// The target URL exactly as stored.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The target's hostname, if the URL has one.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.parsed.host_str()
    }

    /// Resolve the target's IP address, caching the outcome.
    ///
    /// Hostnames that are already address literals are parsed directly;
    /// everything else goes through a DNS lookup. Resolution failure is
    /// logged at debug level and cached as `None`.
    pub async fn ip(&self) -> Option<IpAddr> {
        *self
            .ip
            .get_or_init(|| async { resolve_ip(self.parsed.host_str()).await })
            .await
    }

    /// Content hash of the URL, used as the report filename key.
    #[must_use]
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| content_hash(&self.url))
    }
}

async fn resolve_ip(host: Option<&str>) -> Option<IpAddr> {
    let host = host?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(error) => {
            tracing::debug!(host, %error, "failed to resolve ip address");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_host() {
        let target = Target::new("http://www.example.com/foo.php?id=4").expect("parse target");
        assert_eq!(target.host(), Some("www.example.com"));
        assert_eq!(target.url(), "http://www.example.com/foo.php?id=4");
    }

    #[test]
    fn test_target_rejects_invalid_url() {
        assert!(Target::new("definitely not a url").is_err());
    }

    #[test]
    fn test_target_hash_matches_content_hash() {
        let url = "http://www.example.com/foo.php?id=4";
        let target = Target::new(url).expect("parse target");
        assert_eq!(target.hash(), content_hash(url));
        // Second call returns the cached value
        assert_eq!(target.hash(), content_hash(url));
    }

    #[tokio::test]
    async fn test_target_ip_literal_host() {
        let target = Target::new("http://127.0.0.1:8080/admin").expect("parse target");
        assert_eq!(target.ip().await, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_target_ip_unresolvable_host_is_none() {
        let target = Target::new("http://nonexistent.invalid/p").expect("parse target");
        assert_eq!(target.ip().await, None);
    }
}
