use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dump file already ingested for a source, keyed by its checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksumRecord {
    pub checksum: String,
    pub source: String,
    pub file_path: String,
    pub record_count: u64,
    pub processed_at: DateTime<Utc>,
}

impl FileChecksumRecord {
    pub fn new(
        checksum: impl Into<String>,
        source: impl Into<String>,
        file_path: impl Into<String>,
        record_count: u64,
    ) -> Self {
        Self {
            checksum: checksum.into(),
            source: source.into(),
            file_path: file_path.into(),
            record_count,
            processed_at: Utc::now(),
        }
    }
}
