//! Exclusion rules keeping targets out of the frontier.
//!
//! A blocklist holds three kinds of rules, classified by item prefix:
//! `ip:<CIDR-or-address>`, `host:<exact-hostname>`, and `regex:<pattern>`.
//! Rules live in memory as parsed sets and are backed either by a flat file
//! (one item per line) or by a relational table through the same retryable
//! executor as the frontier. Matching runs in priority order: regex against
//! the full URL, then exact hostname, then IP network membership when the
//! target's DNS resolution succeeds.

use crate::error::{Result, StoreError};
use crate::executor::{get, SqlParam, StoreExecutor};
use dredge_core::Target;
use ipnet::IpNet;
use regex::{Regex, RegexSet};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a target matched the blocklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockMatch {
    /// A regex pattern matched the full URL
    Regex(String),
    /// The target's hostname is blocked
    Host(String),
    /// The target resolved into a blocked network
    Ip(IpNet),
}

impl fmt::Display for BlockMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(pattern) => write!(f, "regex:{pattern}"),
            Self::Host(host) => write!(f, "host:{host}"),
            Self::Ip(net) => write!(f, "ip:{}", render_net(net)),
        }
    }
}

#[derive(Debug, Clone)]
enum BlockRule {
    Ip(IpNet),
    Host(String),
    Regex(String),
}

enum Backing {
    Store(StoreExecutor),
    File(PathBuf),
}

/// A set of exclusion rules with a persistent backing.
pub struct Blocklist {
    backing: Backing,
    ip_nets: HashSet<IpNet>,
    hosts: HashSet<String>,
    patterns: Vec<String>,
    regex: Option<RegexSet>,
}

impl Blocklist {
    /// Open a blocklist at `address`.
    ///
    /// A `postgresql://` or `sqlite3://` address selects the store backing
    /// (sharing the frontier's executor machinery and retry policy);
    /// anything else is treated as a flat file path.
    pub async fn open(address: &str, retries: u32, retry_on: Vec<String>) -> Result<Self> {
        if address.starts_with("postgresql://")
            || address.starts_with("postgres://")
            || address.starts_with("sqlite3://")
        {
            Self::open_store(address, retries, retry_on).await
        } else {
            Self::open_file(Path::new(address)).await
        }
    }

    /// Open a store-backed blocklist.
    pub async fn open_store(address: &str, retries: u32, retry_on: Vec<String>) -> Result<Self> {
        let executor = StoreExecutor::connect(address, retries, retry_on).await?;
        let id = executor.dialect().id_column();
        executor
            .execute(
                format!("CREATE TABLE IF NOT EXISTS blocklist (id {id}, item VARCHAR UNIQUE)"),
                vec![],
            )
            .await?;

        let rows = executor
            .fetch_all("SELECT item FROM blocklist ORDER BY id ASC".to_string(), vec![])
            .await?;
        let items = rows
            .iter()
            .map(|row| get::<String>(row, 0))
            .collect::<Result<Vec<_>>>()?;

        let mut blocklist = Self::empty(Backing::Store(executor));
        blocklist.parse_items(items);
        Ok(blocklist)
    }

    /// Open a file-backed blocklist, creating parent directories on demand.
    /// A missing file is an empty blocklist; the file appears on first add.
    pub async fn open_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let items = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(StoreError::Io(error)),
        };

        let mut blocklist = Self::empty(Backing::File(path.to_path_buf()));
        blocklist.parse_items(items);
        Ok(blocklist)
    }

    fn empty(backing: Backing) -> Self {
        Self {
            backing,
            ip_nets: HashSet::new(),
            hosts: HashSet::new(),
            patterns: Vec::new(),
            regex: None,
        }
    }

    /// Load rule items, skipping (and logging) anything malformed so one
    /// bad line never poisons the rest of the list.
    fn parse_items(&mut self, items: impl IntoIterator<Item = String>) {
        for item in items {
            match parse_item(&item) {
                Ok(rule) => self.insert_rule(rule),
                Err(error) => tracing::warn!(%error, "skipping blocklist item"),
            }
        }
        self.rebuild_regex();
    }

    fn insert_rule(&mut self, rule: BlockRule) {
        match rule {
            BlockRule::Ip(net) => {
                self.ip_nets.insert(net);
            }
            BlockRule::Host(host) => {
                self.hosts.insert(host);
            }
            BlockRule::Regex(pattern) => {
                if !self.patterns.contains(&pattern) {
                    self.patterns.push(pattern);
                }
            }
        }
    }

    fn rebuild_regex(&mut self) {
        if self.patterns.is_empty() {
            self.regex = None;
            return;
        }
        // Patterns were validated individually at parse time, so the
        // combined set is expected to compile; a failure here drops regex
        // matching rather than the whole list.
        match RegexSet::new(&self.patterns) {
            Ok(set) => self.regex = Some(set),
            Err(error) => {
                tracing::warn!(%error, "failed to compile blocklist regex set");
                self.regex = None;
            }
        }
    }

    /// Check a target against the rules, in priority order.
    ///
    /// DNS resolution is best-effort: a hostname that does not resolve
    /// simply disables the IP rules for that target.
    pub async fn matches(&self, target: &Target) -> Option<BlockMatch> {
        if let Some(set) = &self.regex {
            if let Some(index) = set.matches(target.url()).iter().next() {
                return Some(BlockMatch::Regex(self.patterns[index].clone()));
            }
        }

        if let Some(host) = target.host() {
            if self.hosts.contains(host) {
                return Some(BlockMatch::Host(host.to_string()));
            }
        }

        if !self.ip_nets.is_empty() {
            if let Some(ip) = target.ip().await {
                for net in &self.ip_nets {
                    if net.contains(&ip) {
                        return Some(BlockMatch::Ip(*net));
                    }
                }
            }
        }

        None
    }

    /// Validate and add one rule, persisting it to the backing.
    pub async fn add(&mut self, item: &str) -> Result<()> {
        let rule = parse_item(item)?;
        self.insert_rule(rule);
        self.rebuild_regex();

        match &self.backing {
            Backing::Store(executor) => {
                let dialect = executor.dialect();
                executor
                    .execute(
                        format!(
                            "{} INTO blocklist (item) VALUES ({}) {}",
                            dialect.insert(),
                            dialect.placeholder(1),
                            dialect.conflict()
                        ),
                        vec![SqlParam::Text(item.to_string())],
                    )
                    .await?;
            }
            Backing::File(path) => {
                let mut contents = match tokio::fs::read_to_string(path).await {
                    Ok(contents) => contents,
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(error) => return Err(StoreError::Io(error)),
                };
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(item);
                contents.push('\n');
                tokio::fs::write(path, contents).await?;
            }
        }
        Ok(())
    }

    /// Remove one rule, persisting the removal.
    pub async fn delete(&mut self, item: &str) -> Result<()> {
        let rule = parse_item(item)?;
        match rule {
            BlockRule::Ip(net) => {
                self.ip_nets.remove(&net);
            }
            BlockRule::Host(host) => {
                self.hosts.remove(&host);
            }
            BlockRule::Regex(pattern) => {
                self.patterns.retain(|p| p != &pattern);
                self.rebuild_regex();
            }
        }

        match &self.backing {
            Backing::Store(executor) => {
                executor
                    .execute(
                        format!(
                            "DELETE FROM blocklist WHERE item = {}",
                            executor.dialect().placeholder(1)
                        ),
                        vec![SqlParam::Text(item.to_string())],
                    )
                    .await?;
            }
            Backing::File(path) => {
                self.rewrite_file(path.clone()).await?;
            }
        }
        Ok(())
    }

    /// Clear every rule and the backing store or file.
    pub async fn flush(&mut self) -> Result<()> {
        tracing::info!("flushing blocklist");
        self.ip_nets.clear();
        self.hosts.clear();
        self.patterns.clear();
        self.regex = None;

        match &self.backing {
            Backing::Store(executor) => {
                executor
                    .execute("DELETE FROM blocklist".to_string(), vec![])
                    .await?;
            }
            Backing::File(path) => {
                tokio::fs::write(path, "").await?;
            }
        }
        Ok(())
    }

    /// Render the current rules back to `prefix:value` items.
    ///
    /// Single-address networks print as bare addresses.
    #[must_use]
    pub fn items(&self) -> Vec<String> {
        let mut items: Vec<String> = self
            .ip_nets
            .iter()
            .map(|net| format!("ip:{}", render_net(net)))
            .collect();
        items.sort();
        let mut hosts: Vec<String> = self.hosts.iter().map(|h| format!("host:{h}")).collect();
        hosts.sort();
        items.extend(hosts);
        items.extend(self.patterns.iter().map(|p| format!("regex:{p}")));
        items
    }

    async fn rewrite_file(&self, path: PathBuf) -> Result<()> {
        let mut contents = self.items().join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

fn parse_item(item: &str) -> Result<BlockRule> {
    let Some((prefix, value)) = item.split_once(':') else {
        return Err(StoreError::BlocklistItem {
            item: item.to_string(),
            reason: "expected an ip:, host:, or regex: prefix".to_string(),
        });
    };
    match prefix {
        "ip" => {
            let net = value
                .parse::<IpNet>()
                .or_else(|_| value.parse::<std::net::IpAddr>().map(IpNet::from))
                .map_err(|e| StoreError::BlocklistItem {
                    item: item.to_string(),
                    reason: format!("not an address or network: {e}"),
                })?;
            Ok(BlockRule::Ip(net))
        }
        "host" => Ok(BlockRule::Host(value.to_string())),
        "regex" => {
            Regex::new(value).map_err(|e| StoreError::BlocklistItem {
                item: item.to_string(),
                reason: format!("invalid pattern: {e}"),
            })?;
            Ok(BlockRule::Regex(value.to_string()))
        }
        _ => Err(StoreError::BlocklistItem {
            item: item.to_string(),
            reason: format!("unknown prefix '{prefix}'"),
        }),
    }
}

fn render_net(net: &IpNet) -> String {
    if net.prefix_len() == net.max_prefix_len() {
        net.addr().to_string()
    } else {
        net.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_blocklist(dir: &tempfile::TempDir) -> Blocklist {
        Blocklist::open_file(&dir.path().join("blocklist.txt"))
            .await
            .expect("open file blocklist")
    }

    fn target(url: &str) -> Target {
        Target::new(url).expect("parse target")
    }

    #[tokio::test]
    async fn test_match_priority_regex_first() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;
        blocklist.add("host:example.com").await.expect("add host");
        blocklist
            .add(r"regex:.*\.php\?debug=")
            .await
            .expect("add regex");

        let matched = blocklist
            .matches(&target("http://example.com/admin.php?debug=1"))
            .await
            .expect("target is blocked");
        assert!(matches!(matched, BlockMatch::Regex(_)));

        let matched = blocklist
            .matches(&target("http://example.com/ok.html"))
            .await
            .expect("target is blocked");
        assert_eq!(matched, BlockMatch::Host("example.com".to_string()));
    }

    #[tokio::test]
    async fn test_ip_match_with_literal_host() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;
        blocklist.add("ip:10.0.0.0/8").await.expect("add network");

        assert!(matches!(
            blocklist.matches(&target("http://10.1.2.3/p")).await,
            Some(BlockMatch::Ip(_))
        ));
        assert!(blocklist
            .matches(&target("http://192.168.1.1/p"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_host_skips_ip_rules() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;
        blocklist.add("ip:10.0.0.0/8").await.expect("add network");

        // Resolution fails, so only the IP rule is disabled, not the check.
        assert!(blocklist
            .matches(&target("http://nonexistent.invalid/p"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_single_address_renders_bare() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;
        blocklist.add("ip:10.1.2.3").await.expect("add address");
        blocklist.add("ip:10.2.0.0/16").await.expect("add network");

        let items = blocklist.items();
        assert!(items.contains(&"ip:10.1.2.3".to_string()));
        assert!(items.contains(&"ip:10.2.0.0/16".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_items_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;

        assert!(blocklist.add("nonsense").await.is_err());
        assert!(blocklist.add("ip:not-an-address").await.is_err());
        assert!(blocklist.add("regex:[unclosed").await.is_err());
        assert!(blocklist.add("port:8080").await.is_err());
    }

    #[tokio::test]
    async fn test_bad_stored_item_skipped_on_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("blocklist.txt");
        tokio::fs::write(&path, "regex:[unclosed\nhost:bad.example.com\n")
            .await
            .expect("seed blocklist file");

        let blocklist = Blocklist::open_file(&path).await.expect("open blocklist");
        // The broken pattern is skipped, the valid host survives.
        assert_eq!(blocklist.items(), vec!["host:bad.example.com".to_string()]);
        assert!(blocklist
            .matches(&target("http://bad.example.com/p"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_file_roundtrip_and_delete() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("blocklist.txt");

        let mut blocklist = Blocklist::open_file(&path).await.expect("open blocklist");
        blocklist.add("host:one.example.com").await.expect("add");
        blocklist.add("host:two.example.com").await.expect("add");
        drop(blocklist);

        let mut reloaded = Blocklist::open_file(&path).await.expect("reopen blocklist");
        assert_eq!(reloaded.items().len(), 2);

        reloaded
            .delete("host:one.example.com")
            .await
            .expect("delete item");
        drop(reloaded);

        let reloaded = Blocklist::open_file(&path).await.expect("reopen blocklist");
        assert_eq!(reloaded.items(), vec!["host:two.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_truncates_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("blocklist.txt");

        let mut blocklist = Blocklist::open_file(&path).await.expect("open blocklist");
        blocklist.add("host:example.com").await.expect("add");
        blocklist.flush().await.expect("flush");
        assert!(blocklist.items().is_empty());
        assert!(blocklist
            .matches(&target("http://example.com/p"))
            .await
            .is_none());

        let contents = tokio::fs::read_to_string(&path).await.expect("read file");
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn test_store_backed_roundtrip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let address = format!(
            "sqlite3://{}",
            dir.path().join("blocklist.db").display()
        );

        let mut blocklist = Blocklist::open(&address, 0, Vec::new())
            .await
            .expect("open store blocklist");
        blocklist.add("host:example.com").await.expect("add");
        blocklist.add("ip:10.0.0.0/8").await.expect("add");
        drop(blocklist);

        let mut reloaded = Blocklist::open(&address, 0, Vec::new())
            .await
            .expect("reopen store blocklist");
        assert_eq!(reloaded.items().len(), 2);

        reloaded.delete("host:example.com").await.expect("delete");
        reloaded.flush().await.expect("flush");
        drop(reloaded);

        let reloaded = Blocklist::open(&address, 0, Vec::new())
            .await
            .expect("reopen store blocklist");
        assert!(reloaded.items().is_empty());
    }

    #[tokio::test]
    async fn test_regex_match_reason_names_pattern() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut blocklist = file_blocklist(&dir).await;
        blocklist.add("regex:logout").await.expect("add regex");

        let matched = blocklist
            .matches(&target("http://example.com/logout?next=/"))
            .await
            .expect("target is blocked");
        assert_eq!(matched.to_string(), "regex:logout");
    }
}
