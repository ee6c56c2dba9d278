use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_quotas_and_feeds")
        .depends_on(&["0001_ledger_entries"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE daily_quotas (
    quota_date TEXT NOT NULL,
    source TEXT NOT NULL,
    records_ingested INTEGER NOT NULL DEFAULT 0,
    quota_limit INTEGER,
    items_remaining INTEGER,
    quota_hit INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (quota_date, source)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS daily_quotas (
    quota_date TEXT NOT NULL,
    source TEXT NOT NULL,
    records_ingested BIGINT NOT NULL DEFAULT 0,
    quota_limit BIGINT,
    items_remaining BIGINT,
    quota_hit INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (quota_date, source)
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE rss_feed_state (
    feed_url TEXT PRIMARY KEY NOT NULL,
    last_fetch_time TEXT NOT NULL,
    items_found INTEGER NOT NULL DEFAULT 0
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS rss_feed_state (
    feed_url TEXT PRIMARY KEY NOT NULL,
    last_fetch_time TEXT NOT NULL,
    items_found BIGINT NOT NULL DEFAULT 0
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_daily_quotas_source ON daily_quotas(source, quota_date)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_daily_quotas_source ON daily_quotas(source, quota_date)",
                ),
        )
}
