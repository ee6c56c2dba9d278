//! Ledger-wide statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{CrawlLedger, LedgerResult};
use crate::models::EntryState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatistics {
    pub total_urls: u64,
    /// Every state is present, with zero for states that have no entries.
    pub by_state: BTreeMap<EntryState, u64>,
    /// Distinct text hashes among Processed entries.
    pub unique_documents: u64,
    /// Duplicates as a share of all documents that reached a terminal state.
    pub dedup_rate: f64,
}

impl LedgerStatistics {
    pub fn count(&self, state: EntryState) -> u64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

fn dedup_rate(processed: u64, duplicates: u64) -> f64 {
    let terminal = processed + duplicates;
    if terminal == 0 {
        0.0
    } else {
        duplicates as f64 / terminal as f64
    }
}

impl CrawlLedger {
    /// Counts for one source, or for the whole ledger.
    pub async fn get_statistics(&self, source: Option<&str>) -> LedgerResult<LedgerStatistics> {
        let mut by_state: BTreeMap<EntryState, u64> =
            EntryState::ALL.iter().map(|state| (*state, 0)).collect();
        for (state, count) in self.backend.count_by_state(source).await? {
            by_state.insert(state, count);
        }

        let unique_documents = self.backend.count_unique_documents(source).await?;
        let total_urls = by_state.values().sum();
        let rate = dedup_rate(
            by_state[&EntryState::Processed],
            by_state[&EntryState::Duplicate],
        );

        Ok(LedgerStatistics {
            total_urls,
            by_state,
            unique_documents,
            dedup_rate: rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_rate() {
        assert_eq!(dedup_rate(0, 0), 0.0);
        assert_eq!(dedup_rate(3, 1), 0.25);
        assert_eq!(dedup_rate(0, 4), 1.0);
    }
}
