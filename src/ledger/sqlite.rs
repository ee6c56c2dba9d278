//! Embedded ledger on a single SQLite file.

use std::path::Path;

use tracing::debug;

use super::diesel_backend::impl_ledger_backend;
use super::{LedgerError, LedgerResult};
use crate::config::LedgerConfig;
use crate::repository::{run_migrations, SqliteConn, SqlitePool};

/// SQLite-backed ledger. Each operation opens its own connection, so concurrent writers
/// from other processes wait on the busy timeout instead of failing immediately.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (and, with `auto_migrate`, create or upgrade) the database.
    pub async fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let url = config.sqlite_url();
        let pool = SqlitePool::new(&url).with_busy_timeout(config.busy_timeout_ms);

        if let Some(parent) = Path::new(pool.database_url()).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Config(format!(
                        "cannot create ledger directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        if config.auto_migrate {
            let applied = run_migrations(pool.database_url(), true).await?;
            if !applied.is_empty() {
                debug!("Applied ledger migrations: {}", applied.join(", "));
            }
        }
        pool.enable_wal().await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> LedgerResult<SqliteConn> {
        self.pool.get().await
    }

    fn location(&self) -> String {
        self.pool.database_url().to_string()
    }
}

impl_ledger_backend!(SqliteBackend, BackendKind::Embedded);
