//! Schema migrations using cetane.
//!
//! Runs migrations via blocking tasks to work with async connections.

use cetane::migrator::MigrationStateStore;
use tracing::info;

use crate::ledger::{LedgerError, LedgerResult};

/// Apply pending migrations for a database URL, returning the names applied.
pub async fn run_migrations(database_url: &str, no_tls: bool) -> LedgerResult<Vec<String>> {
    let url = database_url.to_string();

    let applied = if super::util::is_postgres_url(&url) {
        #[cfg(feature = "postgres")]
        {
            run_postgres_migrations_async(&url, no_tls).await?
        }
        #[cfg(not(feature = "postgres"))]
        {
            let _ = no_tls;
            return Err(LedgerError::Config(
                "PostgreSQL support not compiled. Use --features postgres".into(),
            ));
        }
    } else {
        let _ = no_tls;
        run_sqlite_migrations_async(&url).await?
    };

    for name in &applied {
        info!("Applied migration: {}", name);
    }
    if applied.is_empty() {
        info!("No pending migrations");
    }
    Ok(applied)
}

fn migration_error(msg: impl std::fmt::Display) -> LedgerError {
    LedgerError::Migration(msg.to_string())
}

async fn run_sqlite_migrations_async(database_url: &str) -> LedgerResult<Vec<String>> {
    use cetane::backend::Sqlite;
    use cetane::migrator::Migrator;

    let path = super::util::sqlite_path(database_url).to_string();

    tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&path).map_err(migration_error)?;
        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map(|applied| applied.iter().map(|name| name.to_string()).collect::<Vec<String>>())
            .map_err(migration_error)
    })
    .await
    .map_err(migration_error)?
}

#[cfg(feature = "postgres")]
async fn run_postgres_migrations_async(
    database_url: &str,
    no_tls: bool,
) -> LedgerResult<Vec<String>> {
    use cetane::backend::Postgres;
    use cetane::migrator::Migrator;

    let client = super::pg_tls::connect_raw(database_url, no_tls)
        .await
        .map_err(|e| LedgerError::BackendUnavailable(super::util::pg_error_message(&e)))?;

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    migrator
        .migrate_forward(|sql| {
            // The migrator is synchronous; drive each statement on a scoped thread.
            let rt = tokio::runtime::Handle::current();
            std::thread::scope(|s| {
                s.spawn(|| {
                    rt.block_on(async {
                        client
                            .batch_execute(sql)
                            .await
                            .map_err(|e| super::util::pg_error_message(&e))
                    })
                })
                .join()
                .map_err(|_| "thread panicked".to_string())?
            })
        })
        .map(|applied| applied.iter().map(|name| name.to_string()).collect::<Vec<String>>())
        .map_err(migration_error)
}

/// Names of migrations recorded as applied, without applying anything.
pub fn applied_sqlite_migrations(database_url: &str) -> LedgerResult<Vec<String>> {
    let conn = rusqlite::Connection::open(super::util::sqlite_path(database_url))
        .map_err(migration_error)?;
    let mut state = SqliteState::new(&conn)?;
    state.applied_migrations().map_err(migration_error)
}

// -- SQLite state store --

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> LedgerResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;

        Ok(Self { conn })
    }
}

impl MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;

        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

// -- PostgreSQL state store --

#[cfg(feature = "postgres")]
struct PostgresState<'a> {
    client: &'a tokio_postgres::Client,
    applied: Vec<String>,
}

#[cfg(feature = "postgres")]
impl<'a> PostgresState<'a> {
    async fn new(client: &'a tokio_postgres::Client) -> LedgerResult<Self> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                    name TEXT PRIMARY KEY NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                &[],
            )
            .await
            .map_err(|e| migration_error(super::util::pg_error_message(&e)))?;

        let rows = client
            .query("SELECT name FROM __cetane_migrations ORDER BY name", &[])
            .await
            .map_err(|e| migration_error(super::util::pg_error_message(&e)))?;

        let applied = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        Ok(Self { client, applied })
    }

    fn run_blocking(&self, sql: &'static str, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute(sql, &[&name])
                        .await
                        .map_err(|e| super::util::pg_error_message(&e))?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })
    }
}

#[cfg(feature = "postgres")]
impl MigrationStateStore for PostgresState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.run_blocking(
            "INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
            name,
        )?;
        if !self.applied.iter().any(|n| n == name) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.run_blocking("DELETE FROM __cetane_migrations WHERE name = $1", name)?;
        self.applied.retain(|n| n != name);
        Ok(())
    }
}
