//! Schema migration tests
//!
//! Runs the cetane registry against an in-memory SQLite database and checks the
//! resulting tables, indexes and constraints.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{params, Connection, Result as SqliteResult};

/// Run cetane migrations (generates SQL for SQLite backend)
fn run_cetane_migrations(conn: &Connection) -> SqliteResult<()> {
    run_cetane_migrations_until(conn, None)
}

/// Run migrations in order, stopping before `stop_before` when given
fn run_cetane_migrations_until(conn: &Connection, stop_before: Option<&str>) -> SqliteResult<()> {
    use cetane::backend::Sqlite;

    let registry = silverledger::migrations::registry();
    let backend = Sqlite;

    let ordered_names = registry
        .resolve_order()
        .expect("Failed to resolve migration order");

    for name in ordered_names {
        if stop_before == Some(name) {
            break;
        }
        let migration = registry
            .get(name)
            .expect("Migration not found after resolve");
        for stmt in migration.forward_sql(&backend) {
            if stmt.trim().is_empty() {
                continue;
            }
            conn.execute_batch(&stmt)?;
        }
    }

    Ok(())
}

fn migrated() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to open DB");
    run_cetane_migrations(&conn).expect("Migrations failed");
    conn
}

/// Column name -> (type, not null) for a table
fn columns(conn: &Connection, table: &str) -> BTreeMap<String, (String, bool)> {
    let mut pragma = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", table))
        .unwrap();
    pragma
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                (row.get::<_, String>(2)?.to_uppercase(), row.get::<_, bool>(3)?),
            ))
        })
        .unwrap()
        .collect::<SqliteResult<_>>()
        .unwrap()
}

fn names(conn: &Connection, kind: &str) -> BTreeSet<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%'")
        .unwrap();
    stmt.query_map([kind], |row| row.get(0))
        .unwrap()
        .collect::<SqliteResult<_>>()
        .unwrap()
}

fn insert_entry(conn: &Connection, url: &str, state: &str, text_hash: Option<&str>) -> SqliteResult<usize> {
    conn.execute(
        "INSERT INTO ledger_entries (url, source, state, text_hash, created_at, updated_at)
         VALUES (?1, 'bbc', ?2, ?3, '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
        params![url, state, text_hash],
    )
}

#[test]
fn test_all_tables_created() {
    let conn = migrated();
    let tables = names(&conn, "table");
    for table in ["ledger_entries", "daily_quotas", "rss_feed_state", "file_checksums"] {
        assert!(tables.contains(table), "missing table {table}: {tables:?}");
    }
}

#[test]
fn test_ledger_entry_columns_match_diesel_schema() {
    let conn = migrated();
    let cols = columns(&conn, "ledger_entries");
    let expected = [
        "id", "url", "source", "state", "text_hash", "minhash_signature", "silver_id",
        "http_status", "etag", "last_modified", "content_length", "error_message",
        "retry_count", "metadata", "created_at", "updated_at", "processed_at",
    ];
    assert_eq!(
        cols.keys().cloned().collect::<BTreeSet<_>>(),
        expected.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>()
    );
    assert_eq!(cols["url"], ("TEXT".to_string(), true));
    assert_eq!(cols["text_hash"], ("TEXT".to_string(), false));
    assert_eq!(cols["retry_count"], ("INTEGER".to_string(), true));
    assert_eq!(cols["processed_at"], ("TEXT".to_string(), false));
}

#[test]
fn test_indexes_created() {
    let conn = migrated();
    let indexes = names(&conn, "index");
    for index in [
        "idx_ledger_text_hash",
        "idx_ledger_source_state",
        "idx_ledger_source_updated",
        "idx_ledger_source_processed",
        "idx_daily_quotas_source",
    ] {
        assert!(indexes.contains(index), "missing index {index}: {indexes:?}");
    }
}

#[test]
fn test_source_url_is_unique() {
    let conn = migrated();
    insert_entry(&conn, "https://a/1", "discovered", None).unwrap();
    assert!(insert_entry(&conn, "https://a/1", "discovered", None).is_err());
    conn.execute(
        "INSERT INTO ledger_entries (url, source, created_at, updated_at)
         VALUES ('https://a/1', 'cnn', 'x', 'x')",
        [],
    )
    .unwrap();
}

#[test]
fn test_text_hash_required_exactly_for_terminal_states() {
    let conn = migrated();
    assert!(insert_entry(&conn, "https://a/1", "processed", None).is_err());
    assert!(insert_entry(&conn, "https://a/2", "fetched", Some("abc")).is_err());
    insert_entry(&conn, "https://a/3", "processed", Some("abc")).unwrap();
    insert_entry(&conn, "https://a/4", "duplicate", Some("abc")).unwrap();
    insert_entry(&conn, "https://a/5", "failed", None).unwrap();

    let demote = conn.execute(
        "UPDATE ledger_entries SET state = 'failed' WHERE url = 'https://a/3'",
        [],
    );
    assert!(demote.is_err());
}

#[test]
fn test_processed_at_backfilled_for_existing_entries() {
    use cetane::backend::Sqlite;

    let conn = Connection::open_in_memory().expect("Failed to open DB");
    run_cetane_migrations_until(&conn, Some("0004_processed_at")).unwrap();
    insert_entry(&conn, "https://a/1", "processed", Some("abc")).unwrap();
    insert_entry(&conn, "https://a/2", "discovered", None).unwrap();

    let registry = silverledger::migrations::registry();
    let migration = registry.get("0004_processed_at").expect("Migration not found");
    for stmt in migration.forward_sql(&Sqlite) {
        conn.execute_batch(&stmt).unwrap();
    }

    let processed_at = |url: &str| -> Option<String> {
        conn.query_row(
            "SELECT processed_at FROM ledger_entries WHERE url = ?1",
            [url],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(
        processed_at("https://a/1").as_deref(),
        Some("2026-01-01T00:00:00.000000Z")
    );
    assert_eq!(processed_at("https://a/2"), None);
}

#[test]
fn test_postgres_sql_generation() {
    use cetane::backend::Postgres;

    let registry = silverledger::migrations::registry();
    let backend = Postgres;

    for name in registry
        .resolve_order()
        .expect("Failed to resolve migration order")
    {
        let migration = registry.get(name).expect("Migration not found");
        let statements = migration.forward_sql(&backend);
        assert!(
            !statements.is_empty(),
            "Migration {} produced no SQL for Postgres",
            migration.name
        );
        for stmt in &statements {
            assert!(
                !stmt.contains("AUTOINCREMENT"),
                "Migration {} uses SQLite-only AUTOINCREMENT: {}",
                migration.name,
                stmt
            );
        }
    }
}
