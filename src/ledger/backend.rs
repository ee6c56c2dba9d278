//! Storage interface shared by the embedded and client-server ledgers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use super::{LedgerError, LedgerResult};
use crate::config::LedgerConfig;
use crate::models::{
    DailyQuota, EntryMetadata, EntryState, FetchInfo, FileChecksumRecord, LedgerEntry,
    RssFeedState,
};
use crate::repository::redact_url_password;

/// Which storage engine backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Single-file SQLite store.
    Embedded,
    /// PostgreSQL behind a connection pool.
    ClientServer,
}

impl BackendKind {
    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" | "sqlite" => Ok(Self::Embedded),
            "client-server" | "client_server" | "postgres" | "postgresql" => {
                Ok(Self::ClientServer)
            }
            other => Err(LedgerError::Config(format!(
                "unknown ledger backend '{other}' (expected 'embedded' or 'client-server')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::ClientServer => "client-server",
        }
    }
}

/// Row selection for entry listings and counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryFilter<'a> {
    pub source: Option<&'a str>,
    /// Empty matches every state.
    pub states: &'a [EntryState],
    pub updated_since: Option<DateTime<Utc>>,
    pub processed_since: Option<DateTime<Utc>>,
}

impl<'a> EntryFilter<'a> {
    pub fn source(source: Option<&'a str>) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_states(mut self, states: &'a [EntryState]) -> Self {
        self.states = states;
        self
    }

    pub fn updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }

    /// Entries first processed at or after `since`. Never-processed entries are excluded.
    pub fn processed_since(mut self, since: DateTime<Utc>) -> Self {
        self.processed_since = Some(since);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrder {
    /// Insertion order, for work queues.
    OldestFirst,
    RecentlyUpdated,
}

/// Column values written by one state transition. `None` leaves a column unchanged.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub state: EntryState,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<Vec<u64>>,
    pub silver_id: Option<String>,
    pub fetch: Option<FetchInfo>,
    /// Replaces the stored metadata as a whole.
    pub metadata: Option<EntryMetadata>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Write NULL to `silver_id` and `minhash_signature`, ignoring the fields above.
    pub clear_outputs: bool,
}

impl StateUpdate {
    pub fn new(state: EntryState) -> Self {
        Self {
            state,
            text_hash: None,
            minhash_signature: None,
            silver_id: None,
            fetch: None,
            metadata: None,
            processed_at: None,
            clear_outputs: false,
        }
    }
}

/// Tables copied by the migration utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTable {
    Entries,
    Quotas,
    Feeds,
    FileChecksums,
}

impl LedgerTable {
    pub const ALL: [LedgerTable; 4] = [
        Self::Entries,
        Self::Quotas,
        Self::Feeds,
        Self::FileChecksums,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entries => "ledger_entries",
            Self::Quotas => "daily_quotas",
            Self::Feeds => "rss_feed_state",
            Self::FileChecksums => "file_checksums",
        }
    }
}

/// Primitive storage operations. Each call is a single statement; the ledger façade
/// layers validation and state-machine rules on top.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable location with credentials redacted.
    fn describe(&self) -> String;

    /// Insert unless `(source, url)` already exists. True when a row was written.
    async fn insert_url(&self, entry: &LedgerEntry) -> LedgerResult<bool>;

    async fn get_url_state(&self, url: &str, source: &str) -> LedgerResult<Option<LedgerEntry>>;

    async fn get_urls_by_state(
        &self,
        filter: &EntryFilter<'_>,
        order: EntryOrder,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    async fn count_urls(&self, filter: &EntryFilter<'_>) -> LedgerResult<u64>;

    /// Apply `update` in one write. False when no row matched.
    async fn mark_url_state(&self, url: &str, source: &str, update: &StateUpdate)
        -> LedgerResult<bool>;

    /// Set Failed and increment `retry_count` in the same write. Terminal rows are untouched.
    async fn record_failure(&self, url: &str, source: &str, error_message: &str)
        -> LedgerResult<bool>;

    /// Processed entries with this hash, oldest first.
    async fn find_by_text_hash(&self, text_hash: &str, limit: usize)
        -> LedgerResult<Vec<LedgerEntry>>;

    async fn count_by_state(&self, source: Option<&str>) -> LedgerResult<Vec<(EntryState, u64)>>;

    /// Distinct content hashes among Processed entries.
    async fn count_unique_documents(&self, source: Option<&str>) -> LedgerResult<u64>;

    async fn last_updated_at(
        &self,
        source: &str,
        state: EntryState,
    ) -> LedgerResult<Option<DateTime<Utc>>>;

    /// Delete Duplicate entries superseded by a newer one with the same hash.
    async fn compact_duplicates(&self) -> LedgerResult<u64>;

    async fn delete_failed_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64>;

    async fn get_quota(&self, date: NaiveDate, source: &str) -> LedgerResult<Option<DailyQuota>>;

    async fn upsert_quota(&self, quota: &DailyQuota) -> LedgerResult<()>;

    async fn get_quota_history(&self, source: &str, limit: usize)
        -> LedgerResult<Vec<DailyQuota>>;

    async fn delete_quotas_before(&self, date: NaiveDate) -> LedgerResult<u64>;

    async fn get_feed_state(&self, feed_url: &str) -> LedgerResult<Option<RssFeedState>>;

    async fn upsert_feed_state(&self, state: &RssFeedState) -> LedgerResult<()>;

    async fn get_file_checksum(
        &self,
        checksum: &str,
        source: &str,
    ) -> LedgerResult<Option<FileChecksumRecord>>;

    /// False when the checksum was already recorded for this source.
    async fn record_file_checksum(&self, record: &FileChecksumRecord) -> LedgerResult<bool>;

    async fn count_rows(&self, table: LedgerTable) -> LedgerResult<u64>;

    /// Entries with id greater than `after_id`, in id order.
    async fn export_entries(&self, after_id: i64, limit: usize) -> LedgerResult<Vec<LedgerEntry>>;

    async fn export_quotas(&self, offset: u64, limit: usize) -> LedgerResult<Vec<DailyQuota>>;

    async fn export_feeds(&self, offset: u64, limit: usize) -> LedgerResult<Vec<RssFeedState>>;

    async fn export_file_checksums(
        &self,
        offset: u64,
        limit: usize,
    ) -> LedgerResult<Vec<FileChecksumRecord>>;

    /// Insert rows that are not present yet. Returns how many were written.
    async fn import_entries(&self, entries: &[LedgerEntry]) -> LedgerResult<usize>;

    async fn import_quotas(&self, quotas: &[DailyQuota]) -> LedgerResult<usize>;

    async fn import_feeds(&self, feeds: &[RssFeedState]) -> LedgerResult<usize>;

    async fn import_file_checksums(&self, records: &[FileChecksumRecord]) -> LedgerResult<usize>;
}

/// Build the backend named by `config.backend`.
pub async fn open_backend(config: &LedgerConfig) -> LedgerResult<Arc<dyn LedgerBackend>> {
    let kind = BackendKind::parse(&config.backend)?;
    let backend: Arc<dyn LedgerBackend> = match kind {
        BackendKind::Embedded => Arc::new(super::sqlite::SqliteBackend::open(config).await?),
        #[cfg(feature = "postgres")]
        BackendKind::ClientServer => {
            Arc::new(super::postgres::PostgresBackend::connect(config).await?)
        }
        #[cfg(not(feature = "postgres"))]
        BackendKind::ClientServer => {
            return Err(LedgerError::Config(
                "client-server ledger requires a build with the 'postgres' feature".into(),
            ))
        }
    };
    info!(
        "Opened {} ledger at {}",
        kind.as_str(),
        redact_url_password(&backend.describe())
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!(BackendKind::parse("embedded").unwrap(), BackendKind::Embedded);
        assert_eq!(BackendKind::parse("SQLite").unwrap(), BackendKind::Embedded);
        assert_eq!(
            BackendKind::parse("client-server").unwrap(),
            BackendKind::ClientServer
        );
        assert_eq!(
            BackendKind::parse("postgres").unwrap(),
            BackendKind::ClientServer
        );
        assert!(matches!(
            BackendKind::parse("mongodb"),
            Err(LedgerError::Config(_))
        ));
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_client_server_without_feature_is_config_error() {
        let config = LedgerConfig::client_server("postgres://localhost/silver");
        assert!(matches!(
            open_backend(&config).await,
            Err(LedgerError::Config(_))
        ));
    }
}
