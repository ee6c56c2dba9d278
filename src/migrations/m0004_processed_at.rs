use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0004_processed_at")
        .depends_on(&["0003_file_checksums"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "ALTER TABLE ledger_entries ADD COLUMN processed_at TEXT",
                )
                .for_backend(
                    "postgres",
                    "ALTER TABLE ledger_entries ADD COLUMN IF NOT EXISTS processed_at TEXT",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "UPDATE ledger_entries SET processed_at = updated_at WHERE state = 'processed'",
                )
                .for_backend(
                    "postgres",
                    "UPDATE ledger_entries SET processed_at = updated_at \
                     WHERE state = 'processed' AND processed_at IS NULL",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_ledger_source_processed ON ledger_entries(source, processed_at)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_ledger_source_processed ON ledger_entries(source, processed_at)",
                ),
        )
}
