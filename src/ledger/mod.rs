//! Crawl ledger: the durable record of every URL an ingestion run has seen.
//!
//! `CrawlLedger` enforces the entry state machine on top of a [`LedgerBackend`]:
//! discovery is idempotent, terminal entries (Processed, Duplicate) are never fetched
//! again, and every transition is a single backend write. Query failures propagate
//! unchanged; retry policy belongs to the caller.

mod backend;
pub(crate) mod diesel_backend;
mod error;
pub mod migrate;
#[cfg(feature = "postgres")]
mod postgres;
mod quota;
mod sqlite;
mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::models::{
    EntryMetadata, EntryState, FetchInfo, FileChecksumRecord, LedgerEntry, ProcessedInfo,
};

pub use backend::{
    open_backend, BackendKind, EntryFilter, EntryOrder, LedgerBackend, LedgerTable, StateUpdate,
};
pub use error::{LedgerError, LedgerResult};
pub use migrate::{LedgerMigrator, MigrationReport, TableReport};
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
pub use stats::LedgerStatistics;

/// State-machine façade over a ledger backend.
#[derive(Clone)]
pub struct CrawlLedger {
    backend: Arc<dyn LedgerBackend>,
    max_retries: u32,
    quota_limits: BTreeMap<String, u64>,
}

impl CrawlLedger {
    /// Open the configured backend. Unknown backend names fail here.
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let backend = open_backend(config).await?;
        Ok(Self::new(backend, config))
    }

    pub fn new(backend: Arc<dyn LedgerBackend>, config: &LedgerConfig) -> Self {
        Self {
            backend,
            max_retries: config.max_retries,
            quota_limits: config.quota_limits.clone(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn LedgerBackend> {
        &self.backend
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // ========================================================================
    // Discovery and fetch decisions
    // ========================================================================

    /// Record a URL as discovered. True only the first time `(url, source)` is seen.
    pub async fn discover_url(&self, url: &str, source: &str) -> LedgerResult<bool> {
        self.discover_url_with_metadata(url, source, EntryMetadata::new())
            .await
    }

    pub async fn discover_url_with_metadata(
        &self,
        url: &str,
        source: &str,
        metadata: EntryMetadata,
    ) -> LedgerResult<bool> {
        validate_key(url, source)?;
        let entry = LedgerEntry::new(url, source).with_metadata(metadata);
        let inserted = self.backend.insert_url(&entry).await?;
        if inserted {
            debug!("Discovered {} ({})", url, source);
        }
        Ok(inserted)
    }

    /// Whether the URL still needs fetching. `force` always says yes.
    pub async fn should_fetch_url(&self, url: &str, source: &str, force: bool) -> LedgerResult<bool> {
        if force {
            return Ok(true);
        }
        let Some(entry) = self.backend.get_url_state(url, source).await? else {
            return Ok(true);
        };
        Ok(match entry.state {
            EntryState::Processed | EntryState::Duplicate => false,
            EntryState::Failed => entry.retry_count < self.max_retries,
            EntryState::Discovered | EntryState::Fetched => true,
        })
    }

    pub async fn get_entry(&self, url: &str, source: &str) -> LedgerResult<Option<LedgerEntry>> {
        self.backend.get_url_state(url, source).await
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Record HTTP details for a fetched URL.
    ///
    /// A refetch of a terminal entry (forced refresh) only updates the HTTP details;
    /// the entry keeps its state and text hash.
    pub async fn mark_fetched(&self, url: &str, source: &str, fetch: FetchInfo) -> LedgerResult<()> {
        let entry = self.require(url, source).await?;
        let state = if entry.state.is_terminal() {
            entry.state
        } else {
            self.check_transition(&entry, EntryState::Fetched)?;
            EntryState::Fetched
        };

        let mut update = StateUpdate::new(state);
        update.fetch = Some(fetch);
        self.apply(url, source, &update).await
    }

    /// Record a successfully processed document.
    pub async fn mark_processed(
        &self,
        url: &str,
        source: &str,
        info: ProcessedInfo,
    ) -> LedgerResult<()> {
        if info.text_hash.is_empty() {
            return Err(LedgerError::InvalidArgument(format!(
                "processed entry {url} needs a text hash"
            )));
        }
        let entry = self.require(url, source).await?;
        self.check_transition(&entry, EntryState::Processed)?;

        let mut metadata = entry.metadata;
        metadata.extend(info.metadata);

        let update = StateUpdate {
            text_hash: Some(info.text_hash),
            minhash_signature: info.minhash_signature,
            silver_id: info.silver_id,
            metadata: Some(metadata),
            // Set once: reprocessing keeps the first processing time.
            processed_at: (entry.state != EntryState::Processed).then(Utc::now),
            ..StateUpdate::new(EntryState::Processed)
        };
        self.apply(url, source, &update).await?;
        debug!("Processed {} ({})", url, source);
        Ok(())
    }

    /// Record that `url` duplicates `original_url`.
    ///
    /// Any corpus id or signature left from an earlier processing is cleared.
    pub async fn mark_duplicate(
        &self,
        url: &str,
        original_url: &str,
        source: &str,
        text_hash: &str,
    ) -> LedgerResult<()> {
        if text_hash.is_empty() {
            return Err(LedgerError::InvalidArgument(format!(
                "duplicate entry {url} needs a text hash"
            )));
        }
        let entry = self.require(url, source).await?;
        self.check_transition(&entry, EntryState::Duplicate)?;

        let mut metadata = entry.metadata;
        metadata.insert(
            "duplicate_of".to_string(),
            serde_json::Value::String(original_url.to_string()),
        );

        let mut update = StateUpdate::new(EntryState::Duplicate);
        update.text_hash = Some(text_hash.to_string());
        update.metadata = Some(metadata);
        update.clear_outputs = true;
        self.apply(url, source, &update).await?;
        debug!("Duplicate {} of {} ({})", url, original_url, source);
        Ok(())
    }

    /// Record a failed attempt and bump the retry counter.
    ///
    /// Once `max_retries` attempts have failed the entry accepts no further transitions.
    pub async fn mark_failed(&self, url: &str, source: &str, error_message: &str) -> LedgerResult<()> {
        let entry = self.require(url, source).await?;
        self.check_transition(&entry, EntryState::Failed)?;

        if !self.backend.record_failure(url, source, error_message).await? {
            // Another writer finished or removed the entry in between.
            let current = self.require(url, source).await?;
            return Err(LedgerError::InvalidTransition {
                url: url.to_string(),
                from: current.state,
                to: EntryState::Failed,
            });
        }

        let attempts = entry.retry_count.saturating_add(1);
        if attempts >= self.max_retries {
            warn!(
                "Giving up on {} ({}) after {} attempts: {}",
                url, source, attempts, error_message
            );
        } else {
            debug!(
                "Fetch of {} failed (attempt {}/{}): {}",
                url, attempts, self.max_retries, error_message
            );
        }
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// URL of a Processed entry with this content hash, from any source or run.
    pub async fn is_duplicate(&self, text_hash: &str) -> LedgerResult<Option<String>> {
        let originals = self.backend.find_by_text_hash(text_hash, 1).await?;
        Ok(originals.into_iter().next().map(|entry| entry.url))
    }

    pub async fn check_file_checksum(
        &self,
        checksum: &str,
        source: &str,
    ) -> LedgerResult<Option<FileChecksumRecord>> {
        self.backend.get_file_checksum(checksum, source).await
    }

    /// Remember that a bulk file was ingested. False if it already was.
    pub async fn record_file_checksum(
        &self,
        checksum: &str,
        source: &str,
        file_path: &str,
        record_count: u64,
    ) -> LedgerResult<bool> {
        let record = FileChecksumRecord::new(checksum, source, file_path, record_count);
        self.backend.record_file_checksum(&record).await
    }

    // ========================================================================
    // Listings
    // ========================================================================

    /// Discovered and Fetched entries, oldest first.
    pub async fn get_pending_urls(&self, source: &str, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        const PENDING: [EntryState; 2] = [EntryState::Discovered, EntryState::Fetched];
        let filter = EntryFilter::source(Some(source)).with_states(&PENDING);
        self.backend
            .get_urls_by_state(&filter, EntryOrder::OldestFirst, limit)
            .await
    }

    pub async fn get_failed_urls(&self, source: &str, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        let filter = EntryFilter::source(Some(source)).with_states(&[EntryState::Failed]);
        self.backend
            .get_urls_by_state(&filter, EntryOrder::RecentlyUpdated, limit)
            .await
    }

    pub async fn get_processed_urls(
        &self,
        source: &str,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let filter = EntryFilter::source(Some(source)).with_states(&[EntryState::Processed]);
        self.backend
            .get_urls_by_state(&filter, EntryOrder::RecentlyUpdated, limit)
            .await
    }

    /// Entries of any state updated at or after `since`, newest first.
    pub async fn get_urls_changed_since(
        &self,
        source: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let filter = EntryFilter::source(Some(source)).updated_since(since);
        self.backend
            .get_urls_by_state(&filter, EntryOrder::RecentlyUpdated, limit)
            .await
    }

    /// When the source last had an entry marked Processed.
    pub async fn get_last_processing_time(
        &self,
        source: &str,
    ) -> LedgerResult<Option<DateTime<Utc>>> {
        self.backend
            .last_updated_at(source, EntryState::Processed)
            .await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Keep only the newest Duplicate entry per text hash and delete the rest.
    /// Processed originals are never touched. Returns the number of rows deleted.
    pub async fn compact_duplicates(&self) -> LedgerResult<u64> {
        let compacted = self.backend.compact_duplicates().await?;
        if compacted > 0 {
            info!("Removed {} redundant duplicate entries", compacted);
        }
        Ok(compacted)
    }

    /// Delete Failed entries not touched for `older_than`, so they are rediscovered fresh.
    pub async fn cleanup_failed(&self, older_than: chrono::Duration) -> LedgerResult<u64> {
        let cutoff = Utc::now() - older_than;
        self.backend.delete_failed_before(cutoff).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require(&self, url: &str, source: &str) -> LedgerResult<LedgerEntry> {
        self.backend
            .get_url_state(url, source)
            .await?
            .ok_or_else(|| not_found(url, source))
    }

    /// A Failed entry that used up its retries is final until cleanup deletes it.
    fn check_transition(&self, entry: &LedgerEntry, next: EntryState) -> LedgerResult<()> {
        let exhausted = entry.state == EntryState::Failed && entry.retry_count >= self.max_retries;
        if !exhausted && entry.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                url: entry.url.clone(),
                from: entry.state,
                to: next,
            })
        }
    }

    async fn apply(&self, url: &str, source: &str, update: &StateUpdate) -> LedgerResult<()> {
        if self.backend.mark_url_state(url, source, update).await? {
            Ok(())
        } else {
            Err(not_found(url, source))
        }
    }

    fn quota_limit(&self, source: &str) -> Option<u64> {
        self.quota_limits.get(source).copied()
    }
}

fn not_found(url: &str, source: &str) -> LedgerError {
    LedgerError::NotFound {
        url: url.to_string(),
        source_name: source.to_string(),
    }
}

fn validate_key(url: &str, source: &str) -> LedgerResult<()> {
    if url.trim().is_empty() {
        return Err(LedgerError::InvalidArgument("url must not be empty".into()));
    }
    if source.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(
            "source must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger(dir: &std::path::Path) -> CrawlLedger {
        let config = LedgerConfig::embedded(dir.join("ledger.db"));
        CrawlLedger::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_embedded_backend_reports_kind() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        assert_eq!(ledger.backend().kind(), BackendKind::Embedded);
    }

    #[tokio::test]
    async fn test_unknown_url_operations_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;

        let err = ledger
            .mark_fetched("https://a/missing", "bbc", FetchInfo::with_status(200))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
        assert!(ledger
            .should_fetch_url("https://a/missing", "bbc", false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_terminal_entry_cannot_fail() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;

        ledger.discover_url("https://a/1", "bbc").await.unwrap();
        ledger
            .mark_processed("https://a/1", "bbc", ProcessedInfo::new("h1"))
            .await
            .unwrap();

        let err = ledger
            .mark_failed("https://a/1", "bbc", "timeout")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: EntryState::Processed,
                to: EntryState::Failed,
                ..
            }
        ));
        let entry = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(entry.text_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_failed_retries_until_limit() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        ledger.discover_url("https://a/1", "bbc").await.unwrap();

        for attempt in 1..=3 {
            ledger
                .mark_failed("https://a/1", "bbc", "connection reset")
                .await
                .unwrap();
            let entry = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
            assert_eq!(entry.retry_count, attempt);
            assert_eq!(entry.error_message.as_deref(), Some("connection reset"));
        }
        assert!(!ledger
            .should_fetch_url("https://a/1", "bbc", false)
            .await
            .unwrap());
        assert!(ledger.should_fetch_url("https://a/1", "bbc", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_failure_rejects_further_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        ledger.discover_url("https://a/1", "bbc").await.unwrap();
        for _ in 0..3 {
            ledger.mark_failed("https://a/1", "bbc", "HTTP 500").await.unwrap();
        }

        let err = ledger
            .mark_failed("https://a/1", "bbc", "HTTP 500")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: EntryState::Failed,
                to: EntryState::Failed,
                ..
            }
        ));
        assert!(ledger
            .mark_fetched("https://a/1", "bbc", FetchInfo::with_status(200))
            .await
            .is_err());
        assert!(ledger
            .mark_processed("https://a/1", "bbc", ProcessedInfo::new("h1"))
            .await
            .is_err());

        let entry = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Failed);
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.http_status, None);
    }

    #[tokio::test]
    async fn test_failure_below_limit_can_be_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        ledger.discover_url("https://a/1", "bbc").await.unwrap();
        ledger.mark_failed("https://a/1", "bbc", "timeout").await.unwrap();

        ledger
            .mark_fetched("https://a/1", "bbc", FetchInfo::with_status(200))
            .await
            .unwrap();
        let entry = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Fetched);
        assert_eq!(entry.retry_count, 1);
    }

    #[tokio::test]
    async fn test_refetch_of_processed_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        ledger.discover_url("https://a/1", "bbc").await.unwrap();
        ledger
            .mark_processed("https://a/1", "bbc", ProcessedInfo::new("h1"))
            .await
            .unwrap();

        let mut fetch = FetchInfo::with_status(304);
        fetch.etag = Some("\"v2\"".into());
        ledger.mark_fetched("https://a/1", "bbc", fetch).await.unwrap();

        let entry = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Processed);
        assert_eq!(entry.http_status, Some(304));
        assert_eq!(entry.etag.as_deref(), Some("\"v2\""));
    }

    #[tokio::test]
    async fn test_duplicate_clears_corpus_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        ledger.discover_url("https://a/1", "bbc").await.unwrap();
        ledger
            .mark_processed(
                "https://a/1",
                "bbc",
                ProcessedInfo::new("h1")
                    .with_silver_id("silver-1")
                    .with_signature(vec![7, 8, 9]),
            )
            .await
            .unwrap();
        let processed = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(processed.silver_id.as_deref(), Some("silver-1"));
        assert_eq!(processed.minhash_signature, Some(vec![7, 8, 9]));
        assert!(processed.processed_at.is_some());

        ledger
            .mark_duplicate("https://a/1", "https://a/0", "bbc", "h0")
            .await
            .unwrap();
        let dup = ledger.get_entry("https://a/1", "bbc").await.unwrap().unwrap();
        assert_eq!(dup.state, EntryState::Duplicate);
        assert_eq!(dup.text_hash.as_deref(), Some("h0"));
        assert_eq!(dup.silver_id, None);
        assert_eq!(dup.minhash_signature, None);
        assert_eq!(dup.duplicate_of(), Some("https://a/0"));
    }

    #[tokio::test]
    async fn test_empty_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path()).await;
        assert!(matches!(
            ledger.discover_url("", "bbc").await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger
                .mark_processed("https://a/1", "bbc", ProcessedInfo::new(""))
                .await,
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
