//! Copy a ledger between backends, e.g. from the embedded store to PostgreSQL.
//!
//! Rows are copied table by table in batches. Rows already present in the target are
//! skipped and the target's version is kept, so an interrupted migration can simply be
//! run again. Skipped rows are reported per table, and row counts are verified once
//! copying finishes.

use serde::Serialize;
use tracing::{info, warn};

use super::{LedgerBackend, LedgerError, LedgerResult, LedgerTable};

/// Progress callback: table, rows copied so far, rows in the source table.
pub type ProgressFn<'a> = Box<dyn Fn(LedgerTable, u64, u64) + Send + Sync + 'a>;

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub source_rows: u64,
    /// Rows written to the target by this run.
    pub copied: u64,
    /// Source rows not written because the target already had that key.
    pub skipped: u64,
    pub target_rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn total_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.copied).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }
}

pub struct LedgerMigrator<'a> {
    source: &'a dyn LedgerBackend,
    target: &'a dyn LedgerBackend,
    batch_size: usize,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> LedgerMigrator<'a> {
    pub fn new(source: &'a dyn LedgerBackend, target: &'a dyn LedgerBackend) -> Self {
        Self {
            source,
            target,
            batch_size: 1000,
            progress: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Copy every table. With `dry_run`, only count what would be copied.
    pub async fn run(&self, dry_run: bool) -> LedgerResult<MigrationReport> {
        info!(
            "Migrating ledger from {} to {}{}",
            self.source.describe(),
            self.target.describe(),
            if dry_run { " (dry run)" } else { "" }
        );

        let mut tables = Vec::with_capacity(LedgerTable::ALL.len());
        for table in LedgerTable::ALL {
            let source_rows = self.source.count_rows(table).await?;
            if dry_run {
                tables.push(TableReport {
                    table: table.as_str(),
                    source_rows,
                    copied: 0,
                    skipped: 0,
                    target_rows: self.target.count_rows(table).await?,
                });
                continue;
            }

            let (read, copied) = self.copy_table(table, source_rows).await?;
            let skipped = read.saturating_sub(copied);
            let target_rows = self.target.count_rows(table).await?;
            if target_rows < source_rows {
                return Err(LedgerError::Verification {
                    table: table.as_str(),
                    source_rows,
                    target_rows,
                });
            }
            if skipped > 0 {
                warn!(
                    "{}: {} rows already existed in the target and were not overwritten",
                    table.as_str(),
                    skipped
                );
            }
            info!(
                "Migrated {}: {} rows copied, {} skipped, {} in target",
                table.as_str(),
                copied,
                skipped,
                target_rows
            );
            tables.push(TableReport {
                table: table.as_str(),
                source_rows,
                copied,
                skipped,
                target_rows,
            });
        }

        Ok(MigrationReport { dry_run, tables })
    }

    /// Returns rows read from the source and rows written to the target.
    async fn copy_table(&self, table: LedgerTable, total: u64) -> LedgerResult<(u64, u64)> {
        let mut read: u64 = 0;
        let mut copied: u64 = 0;
        let mut after_id: i64 = 0;

        loop {
            let (batch_len, written) = match table {
                LedgerTable::Entries => {
                    let batch = self.source.export_entries(after_id, self.batch_size).await?;
                    if let Some(last) = batch.last().and_then(|e| e.id) {
                        after_id = last;
                    }
                    (batch.len(), self.target.import_entries(&batch).await?)
                }
                LedgerTable::Quotas => {
                    let batch = self.source.export_quotas(read, self.batch_size).await?;
                    (batch.len(), self.target.import_quotas(&batch).await?)
                }
                LedgerTable::Feeds => {
                    let batch = self.source.export_feeds(read, self.batch_size).await?;
                    (batch.len(), self.target.import_feeds(&batch).await?)
                }
                LedgerTable::FileChecksums => {
                    let batch = self
                        .source
                        .export_file_checksums(read, self.batch_size)
                        .await?;
                    (batch.len(), self.target.import_file_checksums(&batch).await?)
                }
            };

            read += batch_len as u64;
            copied += written as u64;
            if let Some(ref progress) = self.progress {
                progress(table, read, total);
            }
            if batch_len < self.batch_size {
                break;
            }
        }
        Ok((read, copied))
    }
}
