//! Per-source daily quotas and RSS poll throttling.

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info};

use super::{CrawlLedger, EntryFilter, LedgerResult};
use crate::models::{DailyQuota, EntryState, QuotaStatus, RssFeedState};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl CrawlLedger {
    /// Whether `source` may ingest more records today.
    ///
    /// The limit comes from configuration, falling back to the one stored with today's
    /// row. Ingested counts both what earlier runs recorded and entries first processed
    /// today, so a crashed run that never wrote its quota row still counts. Refetching
    /// an already processed URL does not count again.
    pub async fn check_quota_available(&self, source: &str) -> LedgerResult<QuotaStatus> {
        let date = today();
        let stored = self.backend.get_quota(date, source).await?;
        let limit = self
            .quota_limit(source)
            .or_else(|| stored.as_ref().and_then(|q| q.quota_limit));

        let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let filter = EntryFilter::source(Some(source))
            .with_states(&[EntryState::Processed])
            .processed_since(midnight);
        let processed_today = self.backend.count_urls(&filter).await?;

        let recorded = stored.map_or(0, |q| q.records_ingested);
        let status = QuotaStatus::evaluate(limit, recorded.max(processed_today));
        if !status.available {
            info!(
                "Daily quota reached for '{}': {} of {:?}",
                source, status.ingested, status.limit
            );
        }
        Ok(status)
    }

    /// Add this run's ingest count to today's quota row.
    pub async fn record_run_quota(&self, source: &str, ingested: u64) -> LedgerResult<DailyQuota> {
        let date = today();
        let mut quota = match self.backend.get_quota(date, source).await? {
            Some(existing) => existing,
            None => DailyQuota::new(date, source),
        };
        let limit = self.quota_limit(source).or(quota.quota_limit);
        quota.add_ingested(ingested, limit);
        self.backend.upsert_quota(&quota).await?;

        debug!(
            "Quota for '{}' on {}: {} ingested, {:?} remaining",
            source, date, quota.records_ingested, quota.items_remaining
        );
        Ok(quota)
    }

    /// Most recent quota rows for `source`, newest first.
    pub async fn get_quota_history(&self, source: &str, limit: usize) -> LedgerResult<Vec<DailyQuota>> {
        self.backend.get_quota_history(source, limit).await
    }

    /// Delete quota rows older than `older_than`.
    pub async fn cleanup_quotas(&self, older_than: Duration) -> LedgerResult<u64> {
        let cutoff = (Utc::now() - older_than).date_naive();
        self.backend.delete_quotas_before(cutoff).await
    }

    /// Remember that a feed was polled now.
    pub async fn record_rss_fetch(&self, feed_url: &str, items_found: u64) -> LedgerResult<()> {
        let state = RssFeedState {
            feed_url: feed_url.to_string(),
            last_fetch_time: Utc::now(),
            items_found,
        };
        self.backend.upsert_feed_state(&state).await
    }

    /// True when the feed was never polled or at least `min_hours` have passed.
    pub async fn should_fetch_rss(&self, feed_url: &str, min_hours: u32) -> LedgerResult<bool> {
        Ok(match self.backend.get_feed_state(feed_url).await? {
            Some(state) => state.is_due(min_hours, Utc::now()),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LedgerConfig;
    use crate::ledger::CrawlLedger;
    use crate::models::ProcessedInfo;

    #[tokio::test]
    async fn test_run_quota_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::embedded(dir.path().join("ledger.db")).with_quota("bbc", 100);
        let ledger = CrawlLedger::connect(&config).await.unwrap();

        ledger.record_run_quota("bbc", 40).await.unwrap();
        let quota = ledger.record_run_quota("bbc", 70).await.unwrap();
        assert_eq!(quota.records_ingested, 110);
        assert_eq!(quota.items_remaining, Some(0));
        assert!(quota.quota_hit);

        let status = ledger.check_quota_available("bbc").await.unwrap();
        assert!(!status.available);
        assert_eq!(ledger.get_quota_history("bbc", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_processed_entries_count_towards_quota() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::embedded(dir.path().join("ledger.db")).with_quota("bbc", 3);
        let ledger = CrawlLedger::connect(&config).await.unwrap();

        for i in 0..2 {
            let url = format!("https://bbc.example/{i}");
            ledger.discover_url(&url, "bbc").await.unwrap();
            ledger
                .mark_processed(&url, "bbc", ProcessedInfo::new(format!("h{i}")))
                .await
                .unwrap();
        }
        let status = ledger.check_quota_available("bbc").await.unwrap();
        assert!(status.available);
        assert_eq!(status.remaining, Some(1));
        assert_eq!(status.ingested, 2);

        let unlimited = ledger.check_quota_available("cnn").await.unwrap();
        assert!(unlimited.available);
        assert_eq!(unlimited.remaining, None);
    }

    #[tokio::test]
    async fn test_rss_throttle() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::embedded(dir.path().join("ledger.db"));
        let ledger = CrawlLedger::connect(&config).await.unwrap();
        let feed = "https://bbc.example/rss.xml";

        assert!(ledger.should_fetch_rss(feed, 1).await.unwrap());
        ledger.record_rss_fetch(feed, 25).await.unwrap();
        assert!(!ledger.should_fetch_rss(feed, 1).await.unwrap());
        assert!(ledger.should_fetch_rss(feed, 0).await.unwrap());
    }
}
