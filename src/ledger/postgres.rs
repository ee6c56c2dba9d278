//! Client-server ledger on PostgreSQL.

use std::time::Duration;

use tracing::debug;

use super::diesel_backend::impl_ledger_backend;
use super::{LedgerError, LedgerResult};
use crate::config::LedgerConfig;
use crate::repository::{redact_url_password, run_migrations, PgConn, PgPool, PgPoolOptions};

/// PostgreSQL-backed ledger drawing from a bounded connection pool.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    database_url: String,
}

impl PostgresBackend {
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let database_url = config.database_url.clone().ok_or_else(|| {
            LedgerError::Config("client-server ledger requires DATABASE_URL".into())
        })?;

        if config.auto_migrate {
            let applied = run_migrations(&database_url, config.no_tls).await?;
            if !applied.is_empty() {
                debug!("Applied ledger migrations: {}", applied.join(", "));
            }
        }

        let options = PgPoolOptions {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            statement_timeout: Duration::from_millis(config.statement_timeout_ms),
            no_tls: config.no_tls,
        };
        let pool = PgPool::connect(&database_url, &options).await?;
        debug!(
            "PostgreSQL pool ready for {} (max {} connections)",
            redact_url_password(&database_url),
            options.max_connections
        );

        Ok(Self { pool, database_url })
    }

    pub fn pool_status(&self) -> deadpool::Status {
        self.pool.status()
    }

    async fn connection(&self) -> LedgerResult<PgConn> {
        self.pool.get().await
    }

    fn location(&self) -> String {
        redact_url_password(&self.database_url)
    }
}

impl_ledger_backend!(PostgresBackend, BackendKind::ClientServer);
