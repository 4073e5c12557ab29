//! Structural URL fingerprinting and normalization.
//!
//! The fingerprint maps a URL to a structural-equivalence key: two URLs that
//! hit the same host, the same path depth, the same terminal path segment,
//! and the same set of non-empty query parameter names are assumed to
//! exercise the same code path with different parameter values, so scanning
//! more than one member of the class is redundant. This is what makes deep
//! deduplication possible without fetching any content.

use crate::error::{CoreError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use url::form_urlencoded;
use url::Url;

/// Compute the structural fingerprint of a URL.
///
/// The key is derived from `netloc|depth|page|sorted-params` where:
/// - `netloc` is `host[:port]`
/// - `depth` is the number of `/` characters in the path
/// - `page` is the final path segment (empty for a trailing slash)
/// - `sorted-params` is the set of distinct query parameter names that carry
///   a non-empty value, sorted and comma-joined. Parameters with empty or
///   missing values are assumed not to affect application behavior.
///
/// The concatenation is hashed into a fixed-length hex key.
///
/// # Errors
/// Returns [`CoreError::InvalidUrl`] if the URL cannot be parsed.
pub fn generate_fingerprint(url: &str) -> Result<String> {
    let parsed = parse_url(url)?;

    let netloc = netloc(&parsed);
    let depth = parsed.path().matches('/').count();
    let page = parsed.path().rsplit('/').next().unwrap_or("");

    let mut names = BTreeSet::new();
    if let Some(query) = parsed.query() {
        for pair in query.split('&') {
            if let Some((name, value)) = pair.split_once('=') {
                if !value.is_empty() {
                    names.insert(name);
                }
            }
        }
    }
    let params = names.into_iter().collect::<Vec<_>>().join(",");

    Ok(content_hash(&format!("{netloc}|{depth}|{page}|{params}")))
}

/// Normalize a URL into its canonical enqueue form.
///
/// Parsing through [`Url`] percent-encodes the path; the query string is
/// re-encoded as form data with blank values kept, so that trivially
/// distinct encodings of the same URL collapse to one representation
/// before the store's uniqueness check.
pub fn normalize_url(url: &str) -> Result<String> {
    let mut parsed = parse_url(url)?;

    if parsed.query().is_some() {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &pairs {
            serializer.append_pair(name, value);
        }
        let encoded = serializer.finish();
        if encoded.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.set_query(Some(&encoded));
        }
    }

    Ok(parsed.into())
}

/// Hash arbitrary content into a fixed-length hex key.
///
/// Used for fingerprints and for per-target report filenames.
#[must_use]
pub fn content_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| CoreError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_parameter_values() {
        let a = generate_fingerprint("http://example.com/page.php?id=1").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/page.php?id=2").expect("fingerprint");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_parameter_order() {
        let a = generate_fingerprint("http://example.com/p?a=1&b=2").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/p?b=9&a=7").expect("fingerprint");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_counts_duplicate_names_once() {
        let a = generate_fingerprint("http://example.com/p?x=1&x=2").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/p?x=3").expect("fingerprint");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_excludes_empty_values() {
        let a = generate_fingerprint("http://example.com/p?x=1&y=").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/p?x=1").expect("fingerprint");
        let c = generate_fingerprint("http://example.com/p?x=1&y").expect("fingerprint");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_fingerprint_sensitive_to_host() {
        let a = generate_fingerprint("http://a.example.com/p?x=1").expect("fingerprint");
        let b = generate_fingerprint("http://b.example.com/p?x=1").expect("fingerprint");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_port() {
        let a = generate_fingerprint("http://example.com:8080/p").expect("fingerprint");
        let b = generate_fingerprint("http://example.com:8081/p").expect("fingerprint");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_depth() {
        let a = generate_fingerprint("http://example.com/a/p?x=1").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/a/b/p?x=1").expect("fingerprint");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_page() {
        let a = generate_fingerprint("http://example.com/a/one?x=1").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/a/two?x=1").expect("fingerprint");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_parameter_names() {
        let a = generate_fingerprint("http://example.com/p?x=1").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/p?y=1").expect("fingerprint");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_same_depth_different_directories() {
        // Depth is a count, not the directory names, so sibling directories
        // holding the same page collapse together.
        let a = generate_fingerprint("http://example.com/one/p?x=1").expect("fingerprint");
        let b = generate_fingerprint("http://example.com/two/p?x=1").expect("fingerprint");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_rejects_garbage() {
        assert!(generate_fingerprint("not a url").is_err());
    }

    #[test]
    fn test_normalize_collapses_encodings() {
        let a = normalize_url("http://example.com/a b/p?q=hello world").expect("normalize");
        let b = normalize_url("http://example.com/a%20b/p?q=hello%20world").expect("normalize");
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_keeps_blank_values() {
        let normalized = normalize_url("http://example.com/p?x=1&y=&z").expect("normalize");
        assert_eq!(normalized, "http://example.com/p?x=1&y=&z=");
    }

    #[test]
    fn test_normalize_plain_url_roundtrip() {
        let normalized = normalize_url("http://example.com/index.php?id=4").expect("normalize");
        assert_eq!(normalized, "http://example.com/index.php?id=4");
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
