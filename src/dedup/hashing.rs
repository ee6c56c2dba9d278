//! Exact content hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between hashed fields, so ("ab", "c") and ("a", "bc") differ.
const FIELD_SEPARATOR: u8 = 0x1f;

/// A document field that contributes to the exact-duplicate hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashField {
    Text,
    Url,
}

impl HashField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// SHA-256 hex digest of the selected fields, in the given order.
pub fn content_hash(fields: &[HashField], text: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        let value = match field {
            HashField::Text => text,
            HashField::Url => url,
        };
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a file's contents, for whole-dump deduplication.
pub fn file_checksum(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
