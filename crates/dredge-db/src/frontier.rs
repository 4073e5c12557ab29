//! The persistent target frontier.
//!
//! [`TargetStore`] owns the relational schema for targets, sources, and
//! fingerprints, and implements enqueue, dequeue-with-dedup, prune, and the
//! maintenance operations. All statements run through the crate's
//! [`StoreExecutor`](crate::executor::StoreExecutor) retry policy.
//!
//! Dequeue race safety: the winner of a race between concurrent workers is
//! decided by `UPDATE targets SET scanned = 1 WHERE id = ? AND scanned = 0`
//! and its rows-affected count. A worker that claims zero rows lost the race
//! and simply continues its dequeue loop.

use crate::blocklist::{BlockMatch, Blocklist};
use crate::error::{Result, StoreError};
use crate::executor::{get, SqlDialect, SqlParam, StoreExecutor};
use dredge_core::{generate_fingerprint, normalize_url, CoreError, Target};
use sqlx::any::AnyRow;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Batch size for multi-row target inserts.
const CHUNK_SIZE: usize = 1000;

/// Options applied when opening a [`TargetStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Drop and recreate all tables
    pub drop_tables: bool,
    /// Number of retries for failed storage operations
    pub retries: u32,
    /// Error substrings that should trigger a retry
    pub retry_on: Vec<String>,
}

/// Options for [`TargetStore::get_next_target`].
#[derive(Debug, Clone, Default)]
pub struct DequeueOptions {
    /// Restrict to targets discovered by this source label
    pub source: Option<String>,
    /// Dequeue in random order instead of FIFO
    pub random: bool,
    /// Fetch the next scannable target without marking anything scanned
    pub test: bool,
    /// Delete targets whose screening fails instead of parking them
    pub delete_on_error: bool,
}

/// Options for [`TargetStore::prune`].
#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// Restrict to targets discovered by this source label
    pub source: Option<String>,
    /// Walk targets in random order
    pub random: bool,
    /// Maximum number of targets to visit (0 = all)
    pub count: u64,
    /// Maximum matches per fingerprint before excess duplicates are
    /// deleted rather than left pending (0 = uncapped)
    pub fingerprint_max: u64,
    /// Delete targets whose screening fails instead of parking them
    pub delete_on_error: bool,
}

/// Options for the read-only listing operations.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only include targets still eligible for scanning
    pub unscanned_only: bool,
    /// Restrict to targets discovered by this source label
    pub source: Option<String>,
    /// Include each target's source label in the result
    pub with_source: bool,
    /// Return targets in random order
    pub random: bool,
    /// Maximum number of targets to return (0 = all)
    pub count: u64,
}

/// A listed target row: the URL plus its source label when requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRow {
    /// The stored URL
    pub url: String,
    /// Source label, when the listing asked for it and one exists
    pub source: Option<String>,
}

/// The persistent, deduplicating, filterable work queue.
pub struct TargetStore {
    executor: StoreExecutor,
}

impl TargetStore {
    /// Open (and if necessary create) the frontier at `address`.
    pub async fn open(address: &str, options: &StoreOptions) -> Result<Self> {
        let executor =
            StoreExecutor::connect(address, options.retries, options.retry_on.clone()).await?;
        let store = Self { executor };
        store.init_schema(options.drop_tables).await?;
        Ok(store)
    }

    fn dialect(&self) -> &SqlDialect {
        self.executor.dialect()
    }

    async fn init_schema(&self, drop_tables: bool) -> Result<()> {
        if drop_tables {
            tracing::debug!("dropping tables");
            for table in ["targets", "sources", "fingerprints", "blocklist"] {
                self.execute(format!("DROP TABLE IF EXISTS {table}"), vec![])
                    .await?;
            }
        }

        let id = self.dialect().id_column();
        self.execute(
            format!(
                "CREATE TABLE IF NOT EXISTS targets \
                 (id {id}, \
                 url VARCHAR UNIQUE, \
                 source_id INTEGER, \
                 fingerprint_id INTEGER, \
                 scanned INTEGER DEFAULT 0)"
            ),
            vec![],
        )
        .await?;
        self.execute(
            format!("CREATE TABLE IF NOT EXISTS sources (id {id}, source VARCHAR UNIQUE)"),
            vec![],
        )
        .await?;
        self.execute(
            format!(
                "CREATE TABLE IF NOT EXISTS fingerprints \
                 (id {id}, fingerprint VARCHAR UNIQUE, scanned INTEGER DEFAULT 0)"
            ),
            vec![],
        )
        .await?;
        Ok(())
    }

    // --- enqueue ---------------------------------------------------------

    /// Screen, normalize, and insert a single URL.
    ///
    /// Blocked and unparseable URLs are never written; the insert itself is
    /// idempotent, so re-adding a known URL is a no-op.
    pub async fn add_target(
        &self,
        url: &str,
        source: Option<&str>,
        blocklists: &[Blocklist],
    ) -> Result<usize> {
        let urls = [url.to_string()];
        self.add_targets(&urls, source, blocklists).await
    }

    /// Batched form of [`Self::add_target`]: identical screening and
    /// normalization per URL, chunked inserts for efficiency.
    ///
    /// Returns the number of rows submitted for insertion.
    pub async fn add_targets(
        &self,
        urls: &[String],
        source: Option<&str>,
        blocklists: &[Blocklist],
    ) -> Result<usize> {
        let source_id = match source {
            Some(label) => Some(self.get_or_add_source(label).await?),
            None => None,
        };

        let mut valid = Vec::new();
        for url in urls {
            match screen(url, blocklists).await {
                Err(error) => {
                    tracing::debug!(%url, %error, "skipping (unparseable url)");
                }
                Ok(Some(matched)) => {
                    tracing::debug!(%url, %matched, "skipping (matches blocklist)");
                }
                Ok(None) => match normalize_url(url) {
                    Ok(normalized) => valid.push(normalized),
                    Err(error) => {
                        tracing::debug!(%url, %error, "skipping (normalization failed)");
                    }
                },
            }
        }

        tracing::info!(count = valid.len(), "adding targets");
        let dialect = *self.dialect();
        for chunk in valid.chunks(CHUNK_SIZE) {
            let mut values = String::new();
            let mut params = Vec::with_capacity(chunk.len() * 2);
            for (i, url) in chunk.iter().enumerate() {
                if i > 0 {
                    values.push_str(", ");
                }
                let _ = write!(
                    values,
                    "({}, {})",
                    dialect.placeholder(2 * i + 1),
                    dialect.placeholder(2 * i + 2)
                );
                params.push(SqlParam::Text(url.clone()));
                params.push(source_id.map_or(SqlParam::Null, SqlParam::Int));
            }
            self.execute(
                format!(
                    "{} INTO targets (url, source_id) VALUES {} {}",
                    dialect.insert(),
                    values,
                    dialect.conflict()
                ),
                params,
            )
            .await?;
        }
        Ok(valid.len())
    }

    // --- dequeue ---------------------------------------------------------

    /// Hand out the next eligible target, deduplicating by fingerprint.
    ///
    /// Runs the bounded dequeue loop: fetch the next row that is unscanned
    /// and whose fingerprint class is not yet covered; delete it if it
    /// matches a blocklist; compute and attach its fingerprint if missing;
    /// skip it if the class was already covered this session or in storage;
    /// otherwise claim it and return it. `Ok(None)` is the terminal signal
    /// for the scan loop.
    pub async fn get_next_target(
        &self,
        blocklists: &[Blocklist],
        options: &DequeueOptions,
    ) -> Result<Option<Target>> {
        let (sql, params) = self.next_target_query(options);
        // Fingerprints first seen in this call, so repeated storage probes
        // are skipped while draining a large class.
        let mut session: HashMap<String, i64> = HashMap::new();

        loop {
            let Some(row) = self.fetch_optional(sql.clone(), params.clone()).await? else {
                return Ok(None);
            };
            let target_id: i64 = get(&row, 0)?;
            let url: String = get(&row, 1)?;
            let fingerprint_id: Option<i64> = get(&row, 2)?;

            match screen(&url, blocklists).await {
                Err(error) => {
                    tracing::debug!(%url, %error, "screening failed");
                    self.park_failed_target(target_id, options.delete_on_error)
                        .await?;
                    continue;
                }
                Ok(Some(matched)) => {
                    tracing::debug!(%url, %matched, "deleting (matches blocklist)");
                    self.delete_target_by_id(target_id).await?;
                    continue;
                }
                Ok(None) => {}
            }

            if let Some(fingerprint_id) = fingerprint_id {
                tracing::debug!(%url, "found unique fingerprint");
                if options.test {
                    return Ok(Some(Target::new(&url)?));
                }
                if !self.claim_target(target_id).await? {
                    continue;
                }
                self.mark_fingerprint_scanned(fingerprint_id).await?;
                return Ok(Some(Target::new(&url)?));
            }

            tracing::debug!(%url, "computing fingerprint");
            let fingerprint = match generate_fingerprint(&url) {
                Ok(fingerprint) => fingerprint,
                Err(error) => {
                    tracing::debug!(%url, %error, "fingerprinting failed");
                    self.park_failed_target(target_id, options.delete_on_error)
                        .await?;
                    continue;
                }
            };

            if let Some(&known_id) = session.get(&fingerprint) {
                tracing::debug!(%url, "skipping (matches fingerprint seen this session)");
                self.update_target_fingerprint(target_id, known_id).await?;
                continue;
            }
            if let Some(known_id) = self.get_fingerprint_id(&fingerprint).await? {
                tracing::debug!(%url, "skipping (matches stored fingerprint)");
                session.insert(fingerprint, known_id);
                self.update_target_fingerprint(target_id, known_id).await?;
                continue;
            }

            tracing::debug!(%url, "found unique fingerprint");
            let fingerprint_id = self
                .add_fingerprint(&fingerprint, !options.test)
                .await?;
            self.update_target_fingerprint(target_id, fingerprint_id)
                .await?;
            if options.test {
                return Ok(Some(Target::new(&url)?));
            }
            if !self.claim_target(target_id).await? {
                continue;
            }
            return Ok(Some(Target::new(&url)?));
        }
    }

    fn next_target_query(&self, options: &DequeueOptions) -> (String, Vec<SqlParam>) {
        let mut sql = String::from(
            "SELECT t.id, t.url, t.fingerprint_id FROM targets t \
             LEFT JOIN fingerprints f ON f.id = t.fingerprint_id",
        );
        let mut params = Vec::new();
        if let Some(source) = &options.source {
            sql.push_str(" INNER JOIN sources s ON s.id = t.source_id");
            params.push(SqlParam::Text(source.clone()));
        }
        sql.push_str(" WHERE t.scanned = 0 AND (t.fingerprint_id IS NULL OR f.scanned = 0)");
        if options.source.is_some() {
            let _ = write!(sql, " AND s.source = {}", self.dialect().placeholder(1));
        }
        if options.random {
            sql.push_str(" ORDER BY RANDOM()");
        } else {
            sql.push_str(" ORDER BY t.id ASC");
        }
        sql.push_str(" LIMIT 1");
        (sql, params)
    }

    /// Atomically claim an unscanned target for dispatch.
    ///
    /// Returns false if another worker already claimed it.
    async fn claim_target(&self, target_id: i64) -> Result<bool> {
        let affected = self
            .execute(
                format!(
                    "UPDATE targets SET scanned = 1 WHERE id = {} AND scanned = 0",
                    self.dialect().placeholder(1)
                ),
                vec![SqlParam::Int(target_id)],
            )
            .await?;
        Ok(affected == 1)
    }

    async fn park_failed_target(&self, target_id: i64, delete: bool) -> Result<()> {
        if delete {
            self.delete_target_by_id(target_id).await
        } else {
            self.mark_target_scanned(target_id).await
        }
    }

    // --- maintenance -----------------------------------------------------

    /// Drain the dequeue logic over the whole unscanned set without
    /// dispatching anything: delete blocklist matches, compute missing
    /// fingerprints, and mark duplicates scanned, leaving one representative
    /// unscanned per fingerprint class (subject to `fingerprint_max`).
    pub async fn prune(&self, blocklists: &[Blocklist], options: &PruneOptions) -> Result<()> {
        tracing::info!("pruning database");
        let (sql, params) = self.prune_query(options);
        let rows = self.fetch_all(sql, params).await?;

        // fingerprint string -> (fingerprint id, matches seen so far)
        let mut seen: HashMap<String, (i64, u64)> = HashMap::new();

        for row in rows {
            let target_id: i64 = get(&row, 0)?;
            let url: String = get(&row, 1)?;
            let fingerprint_id: Option<i64> = get(&row, 2)?;
            let fingerprint: Option<String> = get(&row, 3)?;

            match screen(&url, blocklists).await {
                Err(error) => {
                    tracing::debug!(%url, %error, "screening failed");
                    self.park_failed_target(target_id, options.delete_on_error)
                        .await?;
                    continue;
                }
                Ok(Some(matched)) => {
                    tracing::debug!(%url, %matched, "deleting (matches blocklist)");
                    self.delete_target_by_id(target_id).await?;
                    continue;
                }
                Ok(None) => {}
            }

            if let (Some(fingerprint_id), Some(fingerprint)) = (fingerprint_id, fingerprint) {
                if let Some(entry) = seen.get_mut(&fingerprint) {
                    self.mark_duplicate(target_id, &url, entry, options).await?;
                } else {
                    tracing::debug!(%url, "found unique fingerprint");
                    seen.insert(fingerprint, (fingerprint_id, 1));
                }
                continue;
            }

            tracing::debug!(%url, "computing fingerprint");
            let fingerprint = match generate_fingerprint(&url) {
                Ok(fingerprint) => fingerprint,
                Err(error) => {
                    tracing::debug!(%url, %error, "fingerprinting failed");
                    self.park_failed_target(target_id, options.delete_on_error)
                        .await?;
                    continue;
                }
            };

            if let Some(entry) = seen.get_mut(&fingerprint) {
                let known_id = entry.0;
                let kept = self.mark_duplicate(target_id, &url, entry, options).await?;
                if kept {
                    self.update_target_fingerprint(target_id, known_id).await?;
                }
                continue;
            }

            let fingerprint_id = match self.get_fingerprint_id(&fingerprint).await? {
                Some(id) => {
                    tracing::debug!(%url, "matches stored fingerprint");
                    id
                }
                None => {
                    tracing::debug!(%url, "found unique fingerprint");
                    self.add_fingerprint(&fingerprint, false).await?
                }
            };
            seen.insert(fingerprint, (fingerprint_id, 1));
            self.update_target_fingerprint(target_id, fingerprint_id)
                .await?;
        }
        Ok(())
    }

    /// Handle a target whose fingerprint class already has a representative:
    /// mark it scanned, or delete it once the class exceeds the cap.
    ///
    /// Returns whether the row was kept.
    async fn mark_duplicate(
        &self,
        target_id: i64,
        url: &str,
        entry: &mut (i64, u64),
        options: &PruneOptions,
    ) -> Result<bool> {
        if options.fingerprint_max > 0 && entry.1 >= options.fingerprint_max {
            tracing::debug!(%url, "deleting (exceeds max fingerprint count)");
            self.delete_target_by_id(target_id).await?;
            Ok(false)
        } else {
            tracing::debug!(%url, "skipping (matches existing fingerprint)");
            entry.1 += 1;
            self.mark_target_scanned(target_id).await?;
            Ok(true)
        }
    }

    fn prune_query(&self, options: &PruneOptions) -> (String, Vec<SqlParam>) {
        let mut sql = String::from(
            "SELECT t.id, t.url, t.fingerprint_id, f.fingerprint FROM targets t \
             LEFT JOIN fingerprints f ON f.id = t.fingerprint_id",
        );
        let mut params = Vec::new();
        if let Some(source) = &options.source {
            sql.push_str(" INNER JOIN sources s ON s.id = t.source_id");
            params.push(SqlParam::Text(source.clone()));
        }
        sql.push_str(" WHERE t.scanned = 0 AND (t.fingerprint_id IS NULL OR f.scanned = 0)");
        if options.source.is_some() {
            let _ = write!(sql, " AND s.source = {}", self.dialect().placeholder(1));
        }
        if options.random {
            sql.push_str(" ORDER BY RANDOM()");
        } else {
            sql.push_str(" ORDER BY t.id ASC");
        }
        if options.count > 0 {
            let _ = write!(sql, " LIMIT {}", options.count);
        }
        (sql, params)
    }

    /// Compute and attach fingerprints for every target lacking one,
    /// without altering any scanned state. Idempotent.
    pub async fn generate_fingerprints(&self, source: Option<&str>) -> Result<()> {
        tracing::info!("generating fingerprints");
        let mut sql = String::from("SELECT t.id, t.url FROM targets t");
        let mut params = Vec::new();
        if let Some(source) = source {
            sql.push_str(" INNER JOIN sources s ON s.id = t.source_id");
            params.push(SqlParam::Text(source.to_string()));
        }
        sql.push_str(" WHERE t.fingerprint_id IS NULL");
        if source.is_some() {
            let _ = write!(sql, " AND s.source = {}", self.dialect().placeholder(1));
        }

        let rows = self.fetch_all(sql, params).await?;
        let mut known: HashMap<String, i64> = HashMap::new();
        for row in rows {
            let target_id: i64 = get(&row, 0)?;
            let url: String = get(&row, 1)?;

            let fingerprint = match generate_fingerprint(&url) {
                Ok(fingerprint) => fingerprint,
                Err(error) => {
                    tracing::debug!(%url, %error, "fingerprinting failed");
                    continue;
                }
            };

            let fingerprint_id = match known.get(&fingerprint) {
                Some(&id) => id,
                None => {
                    let id = match self.get_fingerprint_id(&fingerprint).await? {
                        Some(id) => id,
                        None => self.add_fingerprint(&fingerprint, false).await?,
                    };
                    known.insert(fingerprint, id);
                    id
                }
            };
            self.update_target_fingerprint(target_id, fingerprint_id)
                .await?;
        }
        Ok(())
    }

    /// Delete a target by URL.
    pub async fn delete_target(&self, url: &str) -> Result<()> {
        self.execute(
            format!(
                "DELETE FROM targets WHERE url = {}",
                self.dialect().placeholder(1)
            ),
            vec![SqlParam::Text(url.to_string())],
        )
        .await?;
        Ok(())
    }

    /// Delete every target and every source label.
    pub async fn flush_targets(&self) -> Result<()> {
        tracing::info!("flushing targets");
        self.execute("DELETE FROM targets".to_string(), vec![])
            .await?;
        self.execute("DELETE FROM sources".to_string(), vec![])
            .await?;
        Ok(())
    }

    /// Delete every fingerprint, clearing target references first so no
    /// dangling `fingerprint_id` survives.
    pub async fn flush_fingerprints(&self) -> Result<()> {
        tracing::info!("flushing fingerprints");
        self.execute("UPDATE targets SET fingerprint_id = NULL".to_string(), vec![])
            .await?;
        self.execute("DELETE FROM fingerprints".to_string(), vec![])
            .await?;
        Ok(())
    }

    /// Reset the scanned flag on every target and fingerprint.
    pub async fn reset_scanned(&self) -> Result<()> {
        tracing::info!("resetting scanned");
        self.execute("UPDATE targets SET scanned = 0".to_string(), vec![])
            .await?;
        self.execute("UPDATE fingerprints SET scanned = 0".to_string(), vec![])
            .await?;
        Ok(())
    }

    /// Reset the scanned flag of one target (and its fingerprint class),
    /// restoring its dequeue eligibility.
    pub async fn mark_unscanned(&self, url: &str) -> Result<()> {
        let row = self
            .fetch_optional(
                format!(
                    "SELECT id, fingerprint_id FROM targets WHERE url = {}",
                    self.dialect().placeholder(1)
                ),
                vec![SqlParam::Text(url.to_string())],
            )
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        let target_id: i64 = get(&row, 0)?;
        let fingerprint_id: Option<i64> = get(&row, 1)?;

        self.execute(
            format!(
                "UPDATE targets SET scanned = 0 WHERE id = {}",
                self.dialect().placeholder(1)
            ),
            vec![SqlParam::Int(target_id)],
        )
        .await?;
        if let Some(fingerprint_id) = fingerprint_id {
            self.execute(
                format!(
                    "UPDATE fingerprints SET scanned = 0 WHERE id = {}",
                    self.dialect().placeholder(1)
                ),
                vec![SqlParam::Int(fingerprint_id)],
            )
            .await?;
        }
        Ok(())
    }

    // --- reporting -------------------------------------------------------

    /// List stored targets.
    pub async fn get_urls(&self, options: &ListOptions) -> Result<Vec<TargetRow>> {
        let (sql, params) = self.list_query(options, false);
        let rows = self.fetch_all(sql, params).await?;
        rows.into_iter()
            .map(|row| {
                Ok(TargetRow {
                    url: get(&row, 0)?,
                    source: if options.with_source {
                        get(&row, 1)?
                    } else {
                        None
                    },
                })
            })
            .collect()
    }

    /// List all source labels in insertion order.
    pub async fn get_sources(&self) -> Result<Vec<String>> {
        let rows = self
            .fetch_all(
                "SELECT source FROM sources ORDER BY id ASC".to_string(),
                vec![],
            )
            .await?;
        rows.iter().map(|row| get(row, 0)).collect()
    }

    /// Number of stored targets matching the listing filter.
    pub async fn target_count(&self, options: &ListOptions) -> Result<i64> {
        let (sql, params) = self.list_query(options, true);
        let row = self.fetch_optional(sql, params).await?;
        row.map_or(Ok(0), |row| get(&row, 0))
    }

    /// Number of known fingerprint classes.
    pub async fn fingerprint_count(&self) -> Result<i64> {
        let row = self
            .fetch_optional("SELECT COUNT(*) FROM fingerprints".to_string(), vec![])
            .await?;
        row.map_or(Ok(0), |row| get(&row, 0))
    }

    fn list_query(&self, options: &ListOptions, count_only: bool) -> (String, Vec<SqlParam>) {
        let mut sql = String::from("SELECT ");
        if count_only {
            sql.push_str("COUNT(*)");
        } else if options.with_source {
            sql.push_str("t.url, s.source");
        } else {
            sql.push_str("t.url");
        }
        sql.push_str(" FROM targets t");

        if options.unscanned_only {
            sql.push_str(" LEFT JOIN fingerprints f ON f.id = t.fingerprint_id");
        }
        let mut params = Vec::new();
        if options.source.is_some() {
            sql.push_str(" INNER JOIN sources s ON s.id = t.source_id");
        } else if options.with_source && !count_only {
            sql.push_str(" LEFT JOIN sources s ON s.id = t.source_id");
        }

        let mut clauses = Vec::new();
        if options.unscanned_only {
            clauses.push(
                "t.scanned = 0 AND (t.fingerprint_id IS NULL OR f.scanned = 0)".to_string(),
            );
        }
        if let Some(source) = &options.source {
            clauses.push(format!("s.source = {}", self.dialect().placeholder(1)));
            params.push(SqlParam::Text(source.clone()));
        }
        for (i, clause) in clauses.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(clause);
        }

        if !count_only {
            if options.random {
                sql.push_str(" ORDER BY RANDOM()");
            } else {
                sql.push_str(" ORDER BY t.id ASC");
            }
            if options.count > 0 {
                let _ = write!(sql, " LIMIT {}", options.count);
            }
        }
        (sql, params)
    }

    // --- row-level helpers -----------------------------------------------

    async fn get_or_add_source(&self, source: &str) -> Result<i64> {
        if let Some(id) = self.get_source_id(source).await? {
            return Ok(id);
        }
        tracing::debug!(source, "adding source");
        let dialect = self.dialect();
        let row = self
            .fetch_optional(
                format!(
                    "{} INTO sources (source) VALUES ({}) {} RETURNING id",
                    dialect.insert(),
                    dialect.placeholder(1),
                    dialect.conflict()
                ),
                vec![SqlParam::Text(source.to_string())],
            )
            .await?;
        match row {
            Some(row) => get(&row, 0),
            // A concurrent writer inserted the label between our probe and
            // our insert; the row exists now.
            None => self
                .get_source_id(source)
                .await?
                .ok_or_else(|| StoreError::Decode("source row vanished after insert".to_string())),
        }
    }

    async fn get_source_id(&self, source: &str) -> Result<Option<i64>> {
        let row = self
            .fetch_optional(
                format!(
                    "SELECT id FROM sources WHERE source = {}",
                    self.dialect().placeholder(1)
                ),
                vec![SqlParam::Text(source.to_string())],
            )
            .await?;
        row.map(|row| get(&row, 0)).transpose()
    }

    async fn get_fingerprint_id(&self, fingerprint: &str) -> Result<Option<i64>> {
        let row = self
            .fetch_optional(
                format!(
                    "SELECT id FROM fingerprints WHERE fingerprint = {}",
                    self.dialect().placeholder(1)
                ),
                vec![SqlParam::Text(fingerprint.to_string())],
            )
            .await?;
        row.map(|row| get(&row, 0)).transpose()
    }

    async fn add_fingerprint(&self, fingerprint: &str, scanned: bool) -> Result<i64> {
        tracing::debug!(fingerprint, "adding fingerprint");
        let dialect = self.dialect();
        let row = self
            .fetch_optional(
                format!(
                    "{} INTO fingerprints (fingerprint, scanned) VALUES ({}, {}) {} RETURNING id",
                    dialect.insert(),
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                    dialect.conflict()
                ),
                vec![
                    SqlParam::Text(fingerprint.to_string()),
                    SqlParam::Int(i64::from(scanned)),
                ],
            )
            .await?;
        match row {
            Some(row) => get(&row, 0),
            None => self.get_fingerprint_id(fingerprint).await?.ok_or_else(|| {
                StoreError::Decode("fingerprint row vanished after insert".to_string())
            }),
        }
    }

    async fn update_target_fingerprint(&self, target_id: i64, fingerprint_id: i64) -> Result<()> {
        tracing::debug!(target_id, fingerprint_id, "updating target fingerprint");
        let dialect = self.dialect();
        self.execute(
            format!(
                "UPDATE targets SET fingerprint_id = {} WHERE id = {}",
                dialect.placeholder(1),
                dialect.placeholder(2)
            ),
            vec![SqlParam::Int(fingerprint_id), SqlParam::Int(target_id)],
        )
        .await?;
        Ok(())
    }

    async fn mark_target_scanned(&self, target_id: i64) -> Result<()> {
        self.execute(
            format!(
                "UPDATE targets SET scanned = 1 WHERE id = {}",
                self.dialect().placeholder(1)
            ),
            vec![SqlParam::Int(target_id)],
        )
        .await?;
        Ok(())
    }

    async fn mark_fingerprint_scanned(&self, fingerprint_id: i64) -> Result<()> {
        self.execute(
            format!(
                "UPDATE fingerprints SET scanned = 1 WHERE id = {}",
                self.dialect().placeholder(1)
            ),
            vec![SqlParam::Int(fingerprint_id)],
        )
        .await?;
        Ok(())
    }

    async fn delete_target_by_id(&self, target_id: i64) -> Result<()> {
        self.execute(
            format!(
                "DELETE FROM targets WHERE id = {}",
                self.dialect().placeholder(1)
            ),
            vec![SqlParam::Int(target_id)],
        )
        .await?;
        Ok(())
    }

    // --- statement plumbing ----------------------------------------------

    async fn execute(&self, sql: String, params: Vec<SqlParam>) -> Result<u64> {
        self.executor.execute(sql, params).await
    }

    async fn fetch_optional(&self, sql: String, params: Vec<SqlParam>) -> Result<Option<AnyRow>> {
        self.executor.fetch_optional(sql, params).await
    }

    async fn fetch_all(&self, sql: String, params: Vec<SqlParam>) -> Result<Vec<AnyRow>> {
        self.executor.fetch_all(sql, params).await
    }
}

/// Screen a URL against every configured blocklist, short-circuiting on the
/// first match. An unparseable URL is a data error surfaced to the caller.
pub async fn screen(
    url: &str,
    blocklists: &[Blocklist],
) -> std::result::Result<Option<BlockMatch>, CoreError> {
    let target = Target::new(url)?;
    for blocklist in blocklists {
        if let Some(matched) = blocklist.matches(&target).await {
            return Ok(Some(matched));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::Blocklist;

    async fn memory_store() -> TargetStore {
        TargetStore::open(":memory:", &StoreOptions::default())
            .await
            .expect("open in-memory store")
    }

    async fn file_blocklist(items: &[&str]) -> (tempfile::TempDir, Blocklist) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("blocklist.txt");
        let mut blocklist = Blocklist::open_file(&path).await.expect("open blocklist");
        for item in items {
            blocklist.add(item).await.expect("add blocklist item");
        }
        (dir, blocklist)
    }

    fn urls(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_target_is_idempotent() {
        let store = memory_store().await;
        store
            .add_target("http://www.example.com/foo.php?id=4", None, &[])
            .await
            .expect("add target");
        store
            .add_target("http://www.example.com/foo.php?id=4", None, &[])
            .await
            .expect("re-add target");

        let count = store
            .target_count(&ListOptions::default())
            .await
            .expect("count targets");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_add_target_normalizes_encodings() {
        let store = memory_store().await;
        store
            .add_target("http://example.com/a b?q=hello world", None, &[])
            .await
            .expect("add target");
        store
            .add_target("http://example.com/a%20b?q=hello%20world", None, &[])
            .await
            .expect("add encoded variant");

        let count = store
            .target_count(&ListOptions::default())
            .await
            .expect("count targets");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_add_targets_skips_unparseable_urls() {
        let store = memory_store().await;
        let added = store
            .add_targets(
                &urls(&["http://example.com/ok?x=1", "not a url at all"]),
                None,
                &[],
            )
            .await
            .expect("add targets");
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn test_add_target_blocked_is_never_written() {
        let store = memory_store().await;
        let (_dir, blocklist) = file_blocklist(&["host:evil.example.com"]).await;
        let blocklists = vec![blocklist];

        store
            .add_target("http://evil.example.com/p?x=1", None, &blocklists)
            .await
            .expect("add blocked target");

        let count = store
            .target_count(&ListOptions::default())
            .await
            .expect("count targets");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_dequeue_exhaustion_dedups_by_fingerprint() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&[
                    "http://a.com/p?x=1",
                    "http://a.com/p?x=2",
                    "http://b.com/p?y=1",
                ]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        let options = DequeueOptions::default();
        let mut dispatched = Vec::new();
        while let Some(target) = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue target")
        {
            dispatched.push(target.url().to_string());
        }

        // One of the two a.com URLs plus the b.com URL, then empty.
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched.iter().any(|u| u.starts_with("http://a.com/")));
        assert!(dispatched.iter().any(|u| u.starts_with("http://b.com/")));
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue empty")
            .is_none());
    }

    #[tokio::test]
    async fn test_dequeue_never_returns_scanned_target() {
        let store = memory_store().await;
        store
            .add_target("http://a.com/p?x=1", None, &[])
            .await
            .expect("add target");

        let options = DequeueOptions::default();
        let first = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue target");
        assert!(first.is_some());

        let second = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue again");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_blocklisted_target_is_deleted() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&["http://blocked.com/p?x=1", "http://fine.com/p?x=1"]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        let (_dir, blocklist) = file_blocklist(&["host:blocked.com"]).await;
        let blocklists = vec![blocklist];

        let target = store
            .get_next_target(&blocklists, &DequeueOptions::default())
            .await
            .expect("dequeue target")
            .expect("one eligible target");
        assert_eq!(target.host(), Some("fine.com"));

        // The blocked target was removed from the store as a side effect.
        let count = store
            .target_count(&ListOptions::default())
            .await
            .expect("count targets");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_dequeue_test_mode_marks_nothing() {
        let store = memory_store().await;
        store
            .add_target("http://a.com/p?x=1", None, &[])
            .await
            .expect("add target");

        let options = DequeueOptions {
            test: true,
            ..DequeueOptions::default()
        };
        let first = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue target");
        let second = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue again");
        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(first.unwrap().url(), second.unwrap().url());
    }

    #[tokio::test]
    async fn test_dequeue_source_filter() {
        let store = memory_store().await;
        store
            .add_target("http://a.com/p?x=1", Some("alpha"), &[])
            .await
            .expect("add alpha target");
        store
            .add_target("http://b.com/p?x=1", Some("beta"), &[])
            .await
            .expect("add beta target");

        let options = DequeueOptions {
            source: Some("beta".to_string()),
            ..DequeueOptions::default()
        };
        let target = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue target")
            .expect("beta target eligible");
        assert_eq!(target.host(), Some("b.com"));
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue empty")
            .is_none());
    }

    #[tokio::test]
    async fn test_prune_converges_to_one_per_class() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&[
                    "http://a.com/p?x=1",
                    "http://a.com/p?x=2",
                    "http://a.com/p?x=3",
                    "http://b.com/p?y=1",
                    "http://b.com/p?y=2",
                ]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        store
            .prune(&[], &PruneOptions::default())
            .await
            .expect("prune");

        let unscanned = store
            .target_count(&ListOptions {
                unscanned_only: true,
                ..ListOptions::default()
            })
            .await
            .expect("count unscanned");
        assert_eq!(unscanned, 2); // one per fingerprint class

        let total = store
            .target_count(&ListOptions::default())
            .await
            .expect("count all");
        assert_eq!(total, 5); // duplicates marked scanned, not deleted
    }

    #[tokio::test]
    async fn test_prune_fingerprint_max_deletes_excess() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&[
                    "http://a.com/p?x=1",
                    "http://a.com/p?x=2",
                    "http://a.com/p?x=3",
                    "http://a.com/p?x=4",
                ]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        store
            .prune(
                &[],
                &PruneOptions {
                    fingerprint_max: 2,
                    ..PruneOptions::default()
                },
            )
            .await
            .expect("prune");

        let total = store
            .target_count(&ListOptions::default())
            .await
            .expect("count all");
        assert_eq!(total, 2); // representative + one tolerated duplicate
    }

    #[tokio::test]
    async fn test_prune_then_dequeue_returns_representatives() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&["http://a.com/p?x=1", "http://a.com/p?x=2"]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        store
            .prune(&[], &PruneOptions::default())
            .await
            .expect("prune");

        let options = DequeueOptions::default();
        let first = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue target");
        assert!(first.is_some());
        let second = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue empty");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_generate_fingerprints_is_idempotent() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&["http://a.com/p?x=1", "http://a.com/p?x=2", "http://b.com/q?z=1"]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        store
            .generate_fingerprints(None)
            .await
            .expect("generate fingerprints");
        store
            .generate_fingerprints(None)
            .await
            .expect("generate fingerprints again");

        assert_eq!(store.fingerprint_count().await.expect("count"), 2);
        // Scanned state untouched: everything still eligible
        let unscanned = store
            .target_count(&ListOptions {
                unscanned_only: true,
                ..ListOptions::default()
            })
            .await
            .expect("count unscanned");
        assert_eq!(unscanned, 3);
    }

    #[tokio::test]
    async fn test_flush_fingerprints_clears_references() {
        let store = memory_store().await;
        store
            .add_targets(&urls(&["http://a.com/p?x=1"]), None, &[])
            .await
            .expect("add targets");
        store
            .generate_fingerprints(None)
            .await
            .expect("generate fingerprints");
        assert_eq!(store.fingerprint_count().await.expect("count"), 1);

        store.flush_fingerprints().await.expect("flush fingerprints");
        assert_eq!(store.fingerprint_count().await.expect("count"), 0);

        let row = store
            .fetch_optional(
                "SELECT fingerprint_id FROM targets".to_string(),
                vec![],
            )
            .await
            .expect("fetch target")
            .expect("target row");
        let fingerprint_id: Option<i64> = get(&row, 0).expect("decode");
        assert_eq!(fingerprint_id, None);
    }

    #[tokio::test]
    async fn test_reset_scanned_restores_eligibility() {
        let store = memory_store().await;
        store
            .add_target("http://a.com/p?x=1", None, &[])
            .await
            .expect("add target");

        let options = DequeueOptions::default();
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue")
            .is_some());
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue empty")
            .is_none());

        store.reset_scanned().await.expect("reset scanned");
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue after reset")
            .is_some());
    }

    #[tokio::test]
    async fn test_mark_unscanned_single_target() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&["http://a.com/p?x=1", "http://b.com/p?y=1"]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        let options = DequeueOptions::default();
        while store
            .get_next_target(&[], &options)
            .await
            .expect("drain")
            .is_some()
        {}

        store
            .mark_unscanned("http://a.com/p?x=1")
            .await
            .expect("mark unscanned");

        let target = store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue restored")
            .expect("restored target");
        assert_eq!(target.url(), "http://a.com/p?x=1");
        assert!(store
            .get_next_target(&[], &options)
            .await
            .expect("dequeue empty")
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_target_and_flush() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&["http://a.com/p?x=1", "http://b.com/p?y=1"]),
                Some("run-1"),
                &[],
            )
            .await
            .expect("add targets");

        store
            .delete_target("http://a.com/p?x=1")
            .await
            .expect("delete target");
        assert_eq!(
            store
                .target_count(&ListOptions::default())
                .await
                .expect("count"),
            1
        );

        store.flush_targets().await.expect("flush targets");
        assert_eq!(
            store
                .target_count(&ListOptions::default())
                .await
                .expect("count"),
            0
        );
        assert!(store.get_sources().await.expect("sources").is_empty());
    }

    #[tokio::test]
    async fn test_sources_and_labeled_listing() {
        let store = memory_store().await;
        store
            .add_target("http://a.com/p?x=1", Some("alpha"), &[])
            .await
            .expect("add alpha target");
        store
            .add_target("http://b.com/p?x=1", Some("beta"), &[])
            .await
            .expect("add beta target");
        store
            .add_target("http://c.com/p?x=1", None, &[])
            .await
            .expect("add unlabeled target");

        assert_eq!(
            store.get_sources().await.expect("sources"),
            vec!["alpha".to_string(), "beta".to_string()]
        );

        let rows = store
            .get_urls(&ListOptions {
                with_source: true,
                ..ListOptions::default()
            })
            .await
            .expect("list targets");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].source.as_deref(), Some("alpha"));
        assert_eq!(rows[2].source, None);

        let filtered = store
            .get_urls(&ListOptions {
                source: Some("beta".to_string()),
                ..ListOptions::default()
            })
            .await
            .expect("list filtered");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].url, "http://b.com/p?x=1");
    }

    #[tokio::test]
    async fn test_listing_count_limit() {
        let store = memory_store().await;
        store
            .add_targets(
                &urls(&[
                    "http://a.com/p?x=1",
                    "http://b.com/p?x=1",
                    "http://c.com/p?x=1",
                ]),
                None,
                &[],
            )
            .await
            .expect("add targets");

        let rows = store
            .get_urls(&ListOptions {
                count: 2,
                ..ListOptions::default()
            })
            .await
            .expect("list targets");
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_tables_recreates_empty_schema() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("frontier.db");
        let address = path.to_str().expect("utf-8 path").to_string();

        let store = TargetStore::open(&address, &StoreOptions::default())
            .await
            .expect("open store");
        store
            .add_target("http://a.com/p?x=1", None, &[])
            .await
            .expect("add target");
        drop(store);

        let store = TargetStore::open(
            &address,
            &StoreOptions {
                drop_tables: true,
                ..StoreOptions::default()
            },
        )
        .await
        .expect("reopen store");
        assert_eq!(
            store
                .target_count(&ListOptions::default())
                .await
                .expect("count"),
            0
        );
    }
}
