//! Per-source daily ingestion quota.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One row per (date, source), written at the end of each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    pub date: NaiveDate,
    pub source: String,
    pub records_ingested: u64,
    pub quota_limit: Option<u64>,
    pub items_remaining: Option<u64>,
    pub quota_hit: bool,
    pub updated_at: DateTime<Utc>,
}

impl DailyQuota {
    pub fn new(date: NaiveDate, source: impl Into<String>) -> Self {
        Self {
            date,
            source: source.into(),
            records_ingested: 0,
            quota_limit: None,
            items_remaining: None,
            quota_hit: false,
            updated_at: Utc::now(),
        }
    }

    /// Add a run's ingest count and recompute the derived fields against `limit`.
    pub fn add_ingested(&mut self, count: u64, limit: Option<u64>) {
        self.records_ingested = self.records_ingested.saturating_add(count);
        self.quota_limit = limit;
        self.items_remaining = limit.map(|l| l.saturating_sub(self.records_ingested));
        self.quota_hit = self.items_remaining == Some(0);
        self.updated_at = Utc::now();
    }
}

/// Answer to "may this source ingest more today?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub available: bool,
    /// None when the source has no limit.
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub ingested: u64,
}

impl QuotaStatus {
    pub fn evaluate(limit: Option<u64>, ingested: u64) -> Self {
        let remaining = limit.map(|l| l.saturating_sub(ingested));
        Self {
            available: remaining.map_or(true, |r| r > 0),
            remaining,
            limit,
            ingested,
        }
    }
}
