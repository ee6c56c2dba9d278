use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_ledger_entries")
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE ledger_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'discovered',
    text_hash TEXT,
    minhash_signature TEXT,
    silver_id TEXT,
    http_status INTEGER,
    etag TEXT,
    last_modified TEXT,
    content_length INTEGER,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source, url),
    CHECK ((state IN ('processed', 'duplicate')) = (text_hash IS NOT NULL))
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS ledger_entries (
    id SERIAL PRIMARY KEY,
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'discovered',
    text_hash TEXT,
    minhash_signature TEXT,
    silver_id TEXT,
    http_status INTEGER,
    etag TEXT,
    last_modified TEXT,
    content_length BIGINT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CONSTRAINT ledger_entries_source_url UNIQUE (source, url),
    CONSTRAINT ledger_entries_text_hash_state
        CHECK ((state IN ('processed', 'duplicate')) = (text_hash IS NOT NULL))
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_ledger_text_hash ON ledger_entries(text_hash) WHERE text_hash IS NOT NULL",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_ledger_text_hash ON ledger_entries(text_hash) WHERE text_hash IS NOT NULL",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_ledger_source_state ON ledger_entries(source, state)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_ledger_source_state ON ledger_entries(source, state)",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_ledger_source_updated ON ledger_entries(source, updated_at)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_ledger_source_updated ON ledger_entries(source, updated_at)",
                ),
        )
}
