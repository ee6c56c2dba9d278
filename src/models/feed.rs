//! RSS feed polling state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssFeedState {
    pub feed_url: String,
    pub last_fetch_time: DateTime<Utc>,
    pub items_found: u64,
}

impl RssFeedState {
    /// Whether at least `min_hours` have passed since the last poll.
    pub fn is_due(&self, min_hours: u32, now: DateTime<Utc>) -> bool {
        now - self.last_fetch_time >= Duration::hours(i64::from(min_hours))
    }
}
