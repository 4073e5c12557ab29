//! Retryable storage execution.
//!
//! Every statement the frontier and the store-backed blocklist issue goes
//! through a [`StoreExecutor`]: a single-connection pool plus a bounded
//! retry loop. An error whose message matches one of the configured
//! retryable substrings triggers a reconnect, an exponential backoff sleep,
//! and another attempt; anything else (or an exhausted bound) is fatal.
//!
//! The executor is also where backend differences live: [`SqlDialect`] is a
//! thin strategy object carrying placeholder syntax, conflict handling, and
//! identity-column DDL for the two supported engines.

use crate::error::{Result, StoreError};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::Mutex;

static INSTALL_DRIVERS: Once = Once::new();

/// Storage backend selected from the address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Embedded file-backed engine
    Sqlite,
    /// Client-server engine
    Postgres,
}

/// A parsed store address: the backend plus the connection URL handed to
/// the driver.
///
/// `postgresql://…` selects PostgreSQL and is passed through unchanged;
/// `sqlite3://<path>` and bare paths select SQLite. Any other scheme is a
/// configuration error.
#[derive(Debug, Clone)]
pub struct StoreAddress {
    backend: Backend,
    url: String,
    file: Option<PathBuf>,
}

impl StoreAddress {
    /// Parse a store address string.
    pub fn parse(address: &str) -> Result<Self> {
        if address.starts_with("postgresql://") || address.starts_with("postgres://") {
            return Ok(Self {
                backend: Backend::Postgres,
                url: address.to_string(),
                file: None,
            });
        }
        if let Some(path) = address.strip_prefix("sqlite3://") {
            return Ok(Self::sqlite(path));
        }
        if address.contains("://") {
            return Err(StoreError::UnsupportedScheme(address.to_string()));
        }
        Ok(Self::sqlite(address))
    }

    fn sqlite(path: &str) -> Self {
        if path == ":memory:" {
            return Self {
                backend: Backend::Sqlite,
                url: "sqlite::memory:".to_string(),
                file: None,
            };
        }
        Self {
            backend: Backend::Sqlite,
            url: format!("sqlite://{path}?mode=rwc"),
            file: Some(PathBuf::from(path)),
        }
    }

    /// The selected backend.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The database file backing a SQLite store, if any.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

/// Per-backend SQL fragments.
///
/// The logical schema is shared; only the identity-column DDL, the
/// insert-with-conflict-handling clause, and the placeholder syntax differ.
#[derive(Debug, Clone, Copy)]
pub struct SqlDialect {
    backend: Backend,
}

impl SqlDialect {
    /// Dialect for the given backend.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// DDL for an auto-assigned integer primary key column.
    #[must_use]
    pub fn id_column(&self) -> &'static str {
        match self.backend {
            Backend::Sqlite => "INTEGER PRIMARY KEY",
            Backend::Postgres => "INTEGER GENERATED ALWAYS AS IDENTITY PRIMARY KEY",
        }
    }

    /// The INSERT keyword for an idempotent insert.
    #[must_use]
    pub fn insert(&self) -> &'static str {
        match self.backend {
            Backend::Sqlite => "INSERT OR IGNORE",
            Backend::Postgres => "INSERT",
        }
    }

    /// The conflict clause paired with [`Self::insert`], placed after the
    /// VALUES list.
    #[must_use]
    pub fn conflict(&self) -> &'static str {
        match self.backend {
            Backend::Sqlite => "",
            Backend::Postgres => "ON CONFLICT DO NOTHING",
        }
    }

    /// Placeholder for the `n`-th bind parameter (1-based).
    #[must_use]
    pub fn placeholder(&self, n: usize) -> String {
        match self.backend {
            Backend::Sqlite => "?".to_string(),
            Backend::Postgres => format!("${n}"),
        }
    }
}

/// Single-connection store executor with bounded retry.
///
/// Owns exactly one pool at a time; reconnects serially, never
/// concurrently. Each successful statement is committed before the call
/// returns (statement-level autocommit).
pub struct StoreExecutor {
    address: StoreAddress,
    dialect: SqlDialect,
    retries: u32,
    retry_on: Vec<String>,
    pool: Mutex<AnyPool>,
}

impl StoreExecutor {
    /// Connect to the store at `address`.
    ///
    /// Parent directories of a file-backed store are created on demand.
    /// The connection attempt itself runs under the same retry policy as
    /// statement execution.
    pub async fn connect(address: &str, retries: u32, retry_on: Vec<String>) -> Result<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let address = StoreAddress::parse(address)?;
        if let Some(parent) = address.file().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    tracing::error!(%e, "failed to create parent directory for store file");
                    StoreError::Io(e)
                })?;
            }
        }

        let mut attempt = 0u32;
        let pool = loop {
            match Self::open_pool(&address).await {
                Ok(pool) => break pool,
                Err(error) if attempt < retries && matches_any(&error, &retry_on) => {
                    tracing::warn!(%error, attempt, "store connection failed, retrying");
                    backoff(attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(%error, "store connection failed, giving up");
                    return Err(StoreError::Connect(error.to_string()));
                }
            }
        };

        Ok(Self {
            dialect: SqlDialect::new(address.backend()),
            address,
            retries,
            retry_on,
            pool: Mutex::new(pool),
        })
    }

    async fn open_pool(address: &StoreAddress) -> std::result::Result<AnyPool, sqlx::Error> {
        AnyPoolOptions::new()
            .max_connections(1)
            .connect(&address.url)
            .await
    }

    /// The SQL dialect for this store's backend.
    #[must_use]
    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    /// The parsed address this executor connected to.
    #[must_use]
    pub fn address(&self) -> &StoreAddress {
        &self.address
    }

    /// Run one storage operation under the retry policy.
    ///
    /// The closure is invoked with a handle to the current pool and may be
    /// called several times; it must rebuild its statement on each call.
    /// Retryable failures reconnect, sleep `2^attempt` seconds (attempt
    /// counted from zero), and try again; non-retryable failures and an
    /// exhausted bound surface as [`StoreError::Execute`].
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(AnyPool) -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            let pool = self.pool.lock().await.clone();
            match op(pool).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.retries && matches_any(&error, &self.retry_on) => {
                    tracing::warn!(%error, attempt, "store execution failed, retrying");
                    self.reconnect().await;
                    backoff(attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(%error, "store execution failed, will not retry");
                    return Err(StoreError::Execute(error.to_string()));
                }
            }
        }
    }

    /// Tear down the current pool and open a fresh one.
    ///
    /// A failed reconnect is logged and left for the next attempt's
    /// statement to surface; the old pool stays in place so the executor
    /// always holds a handle.
    async fn reconnect(&self) {
        match Self::open_pool(&self.address).await {
            Ok(fresh) => {
                let mut guard = self.pool.lock().await;
                let old = std::mem::replace(&mut *guard, fresh);
                old.close().await;
            }
            Err(error) => {
                tracing::warn!(%error, "store reconnect failed");
            }
        }
    }

    /// Close the store connection gracefully.
    pub async fn close(self) {
        self.pool.into_inner().close().await;
    }
}

/// A positional bind parameter for a dynamically built statement.
#[derive(Debug, Clone)]
pub(crate) enum SqlParam {
    Text(String),
    Int(i64),
    Null,
}

impl StoreExecutor {
    /// Execute a statement, returning the number of rows affected.
    pub(crate) async fn execute(&self, sql: String, params: Vec<SqlParam>) -> Result<u64> {
        self.run(move |pool| {
            let sql = sql.clone();
            let params = params.clone();
            async move {
                bind_all(sqlx::query(&sql), &params)
                    .execute(&pool)
                    .await
                    .map(|done| done.rows_affected())
            }
        })
        .await
    }

    /// Execute a statement and fetch at most one row.
    pub(crate) async fn fetch_optional(
        &self,
        sql: String,
        params: Vec<SqlParam>,
    ) -> Result<Option<AnyRow>> {
        self.run(move |pool| {
            let sql = sql.clone();
            let params = params.clone();
            async move {
                bind_all(sqlx::query(&sql), &params)
                    .fetch_optional(&pool)
                    .await
            }
        })
        .await
    }

    /// Execute a statement and fetch all rows.
    pub(crate) async fn fetch_all(
        &self,
        sql: String,
        params: Vec<SqlParam>,
    ) -> Result<Vec<AnyRow>> {
        self.run(move |pool| {
            let sql = sql.clone();
            let params = params.clone();
            async move { bind_all(sqlx::query(&sql), &params).fetch_all(&pool).await }
        })
        .await
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.as_str()),
            SqlParam::Int(value) => query.bind(*value),
            SqlParam::Null => query.bind(None::<i64>),
        };
    }
    query
}

/// Decode one column of a fetched row.
pub(crate) fn get<'r, T>(row: &'r AnyRow, index: usize) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(index)
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn matches_any(error: &sqlx::Error, retry_on: &[String]) -> bool {
    let message = error.to_string();
    retry_on.iter().any(|needle| message.contains(needle))
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
}
