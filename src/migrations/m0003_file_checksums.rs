use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_file_checksums")
        .depends_on(&["0002_quotas_and_feeds"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE file_checksums (
    checksum TEXT NOT NULL,
    source TEXT NOT NULL,
    file_path TEXT NOT NULL,
    record_count INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (checksum, source)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS file_checksums (
    checksum TEXT NOT NULL,
    source TEXT NOT NULL,
    file_path TEXT NOT NULL,
    record_count BIGINT NOT NULL DEFAULT 0,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (checksum, source)
)"#,
                ),
        )
}
