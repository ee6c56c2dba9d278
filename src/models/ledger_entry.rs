//! Ledger entry model: the crawl state of one URL within one source.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form per-entry metadata, keyed by name.
pub type EntryMetadata = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of a ledger entry.
///
/// Entries move forward through `Discovered -> Fetched -> Processed | Duplicate`.
/// `Failed` is a side state that can be retried until `max_retries` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Discovered,
    Fetched,
    Processed,
    Duplicate,
    Failed,
}

impl EntryState {
    pub const ALL: [EntryState; 5] = [
        Self::Discovered,
        Self::Fetched,
        Self::Processed,
        Self::Duplicate,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Fetched => "fetched",
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "fetched" => Some(Self::Fetched),
            "processed" => Some(Self::Processed),
            "duplicate" => Some(Self::Duplicate),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Processed and Duplicate entries carry a text hash and are never refetched.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Duplicate)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Discovered | Self::Failed => 0,
            Self::Fetched => 1,
            Self::Processed | Self::Duplicate => 2,
        }
    }

    /// Whether an entry in this state may move to `next`.
    ///
    /// Discovery is an insert, never a transition. A terminal entry can never fail,
    /// since that would drop its text hash.
    pub fn can_transition_to(&self, next: EntryState) -> bool {
        match (self, next) {
            (_, Self::Discovered) => false,
            (Self::Failed, _) => true,
            (current, Self::Failed) => !current.is_terminal(),
            (current, next) => next.rank() >= current.rank(),
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the crawl ledger, unique per `(url, source)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Database row id (None until stored).
    pub id: Option<i64>,
    pub url: String,
    pub source: String,
    pub state: EntryState,
    /// Content hash, set once the entry is Processed or Duplicate.
    pub text_hash: Option<String>,
    pub minhash_signature: Option<Vec<u64>>,
    /// Identifier of the record in the output corpus.
    pub silver_id: Option<String>,
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub metadata: EntryMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the entry first became Processed. Refetches leave it alone.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// A freshly discovered entry.
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            url: url.into(),
            source: source.into(),
            state: EntryState::Discovered,
            text_hash: None,
            minhash_signature: None,
            silver_id: None,
            http_status: None,
            etag: None,
            last_modified: None,
            content_length: None,
            error_message: None,
            retry_count: 0,
            metadata: EntryMetadata::new(),
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// URL this entry was found to duplicate, if any.
    pub fn duplicate_of(&self) -> Option<&str> {
        self.metadata.get("duplicate_of").and_then(|v| v.as_str())
    }
}

/// HTTP details captured when a URL is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInfo {
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl FetchInfo {
    pub fn with_status(http_status: u16) -> Self {
        Self {
            http_status: Some(http_status),
            ..Default::default()
        }
    }
}

/// Outcome of processing a fetched document into the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedInfo {
    pub text_hash: String,
    pub silver_id: Option<String>,
    pub minhash_signature: Option<Vec<u64>>,
    /// Merged into the entry's existing metadata.
    pub metadata: EntryMetadata,
}

impl ProcessedInfo {
    pub fn new(text_hash: impl Into<String>) -> Self {
        Self {
            text_hash: text_hash.into(),
            silver_id: None,
            minhash_signature: None,
            metadata: EntryMetadata::new(),
        }
    }

    pub fn with_silver_id(mut self, silver_id: impl Into<String>) -> Self {
        self.silver_id = Some(silver_id.into());
        self
    }

    pub fn with_signature(mut self, signature: Vec<u64>) -> Self {
        self.minhash_signature = Some(signature);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Encode a MinHash signature for storage as fixed-width big-endian hex words.
pub fn encode_signature(signature: &[u64]) -> String {
    let mut out = String::with_capacity(signature.len() * 16);
    for value in signature {
        out.push_str(&hex::encode(value.to_be_bytes()));
    }
    out
}

/// Decode a stored signature. Returns None if the text is not a whole number of words.
pub fn decode_signature(encoded: &str) -> Option<Vec<u64>> {
    if encoded.len() % 16 != 0 {
        return None;
    }
    let bytes = hex::decode(encoded).ok()?;
    bytes
        .chunks_exact(8)
        .map(|chunk| chunk.try_into().ok().map(u64::from_be_bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_names() {
        for state in EntryState::ALL {
            assert_eq!(EntryState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(EntryState::from_str("bogus"), None);
    }

    #[test]
    fn test_transitions_only_move_forward() {
        use EntryState::*;

        assert!(Discovered.can_transition_to(Fetched));
        assert!(Discovered.can_transition_to(Processed));
        assert!(Fetched.can_transition_to(Duplicate));
        assert!(Fetched.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Fetched));
        assert!(Failed.can_transition_to(Failed));

        assert!(!Processed.can_transition_to(Fetched));
        assert!(!Processed.can_transition_to(Failed));
        assert!(!Duplicate.can_transition_to(Failed));
        assert!(!Fetched.can_transition_to(Discovered));
    }

    #[test]
    fn test_signature_encoding() {
        let sig = vec![0, 1, u64::MAX, (1 << 61) - 2];
        let encoded = encode_signature(&sig);
        assert_eq!(encoded.len(), 64);
        assert_eq!(decode_signature(&encoded), Some(sig));
        assert_eq!(decode_signature("abc"), None);
        assert_eq!(decode_signature("zzzzzzzzzzzzzzzz"), None);
    }

    #[test]
    fn test_duplicate_of_reads_metadata() {
        let mut entry = LedgerEntry::new("https://a.example/1", "bbc");
        assert_eq!(entry.duplicate_of(), None);
        entry.metadata.insert(
            "duplicate_of".into(),
            serde_json::json!("https://a.example/0"),
        );
        assert_eq!(entry.duplicate_of(), Some("https://a.example/0"));
    }
}
