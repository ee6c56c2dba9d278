//! Connection sources for the two ledger backends.
//!
//! SQLite opens a connection per operation with a busy timeout applied; PostgreSQL
//! draws from a bounded deadpool pool with a wait timeout and a server-side
//! statement timeout.

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

#[cfg(feature = "postgres")]
use std::time::Duration;

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::sqlite_path;
use crate::ledger::LedgerResult;
#[cfg(feature = "postgres")]
use crate::ledger::LedgerError;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// SQLite connection source (lightweight - creates connections on demand).
#[derive(Clone, Debug)]
pub struct SqlitePool {
    database_url: String,
    busy_timeout_ms: u64,
}

impl SqlitePool {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: sqlite_path(database_url).to_string(),
            busy_timeout_ms: 5_000,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// How long a connection waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Open a connection with the busy timeout applied.
    pub async fn get(&self) -> LedgerResult<SqliteConn> {
        let mut conn = SqliteConn::establish(&self.database_url).await?;
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .await?;
        Ok(conn)
    }

    /// Switch the database file to WAL journaling. Persistent, so once per open is enough.
    pub async fn enable_wal(&self) -> LedgerResult<()> {
        let mut conn = self.get().await?;
        conn.batch_execute("PRAGMA journal_mode = WAL;").await?;
        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Sizing and timeouts for the PostgreSQL pool.
#[cfg(feature = "postgres")]
#[derive(Debug, Clone)]
pub struct PgPoolOptions {
    pub max_connections: usize,
    pub min_connections: usize,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
    pub no_tls: bool,
}

/// PostgreSQL connection pool.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgPool {
    /// Build the pool and pre-warm `min_connections` connections.
    pub async fn connect(database_url: &str, options: &PgPoolOptions) -> LedgerResult<Self> {
        let url = with_statement_timeout(database_url, options.statement_timeout)?;

        let manager = if options.no_tls {
            AsyncDieselConnectionManager::<AsyncPgConnection>::new(url)
        } else {
            let mut manager_config = ManagerConfig::default();
            manager_config.custom_setup = Box::new(super::pg_tls::establish_tls_connection);
            AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(url, manager_config)
        };

        let pool = DeadPool::builder(manager)
            .max_size(options.max_connections.max(1))
            .wait_timeout(Some(options.acquire_timeout))
            .create_timeout(Some(options.acquire_timeout))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| LedgerError::Config(format!("invalid pool configuration: {e}")))?;

        let warm = options.min_connections.min(options.max_connections.max(1));
        let mut held = Vec::with_capacity(warm);
        for _ in 0..warm {
            held.push(pool.get().await?);
        }
        drop(held);

        Ok(Self { pool })
    }

    pub async fn get(&self) -> LedgerResult<PgConn> {
        Ok(self.pool.get().await?)
    }

    /// Current pool status (size, available connections).
    pub fn status(&self) -> deadpool::Status {
        self.pool.status()
    }
}

/// Add `statement_timeout` to the connection options carried in the URL.
///
/// An `options` parameter already present in the URL wins.
#[cfg(feature = "postgres")]
fn with_statement_timeout(database_url: &str, timeout: Duration) -> LedgerResult<String> {
    let parsed = url::Url::parse(database_url)
        .map_err(|e| LedgerError::Config(format!("invalid PostgreSQL URL: {e}")))?;
    if parsed.query_pairs().any(|(k, _)| k == "options") {
        return Ok(database_url.to_string());
    }
    let separator = if parsed.query().is_some() { '&' } else { '?' };
    Ok(format!(
        "{database_url}{separator}options=-c%20statement_timeout%3D{}",
        timeout.as_millis()
    ))
}
