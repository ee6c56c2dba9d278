//! Deduplication engine.
//!
//! Two tiers: an exact content hash checked against a bounded LRU cache, then (when
//! enabled) a MinHash signature checked against a persisted LSH index for near
//! duplicates. The engine is owned by one run; the index file is shared between runs
//! only through `save_index` and `DedupEngine::new`, under the source lock.

mod cache;
mod hashing;
mod lsh;
mod minhash;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DedupConfig;

pub use cache::ExactHashCache;
pub use hashing::{content_hash, file_checksum, HashField};
pub use lsh::{optimal_params, LshParams, NearMatch, ShardedLshIndex};
pub use minhash::{MinHashSignature, MinHasher};

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup cache size must be positive, got {0}")]
    InvalidCacheSize(usize),
    #[error("similarity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("invalid dedup configuration: {0}")]
    InvalidConfig(String),
    #[error("signature has {actual} values, index expects {expected}")]
    SignatureLength { expected: usize, actual: usize },
    #[error("failed to write near-duplicate index {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode near-duplicate index: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DedupResult<T> = Result<T, DedupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateType {
    Exact,
    Near,
}

impl DuplicateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Near => "near",
        }
    }
}

/// Verdict for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    pub duplicate_type: Option<DuplicateType>,
    /// URL of the document this one duplicates.
    pub similar_url: Option<String>,
    /// Estimated similarity for near duplicates, 1.0 for exact ones.
    pub similarity: Option<f64>,
    pub text_hash: String,
    pub signature: Option<MinHashSignature>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub processed: u64,
    pub exact_duplicates: u64,
    pub near_duplicates: u64,
    pub unique: u64,
}

pub struct DedupEngine {
    config: DedupConfig,
    cache: ExactHashCache,
    minhasher: Option<MinHasher>,
    index: Option<ShardedLshIndex>,
    stats: DedupStats,
}

impl DedupEngine {
    /// Validate the configuration and load the persisted index, if any.
    pub fn new(config: DedupConfig) -> DedupResult<Self> {
        let threshold = config.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(DedupError::InvalidThreshold(threshold));
        }
        if config.hash_fields.is_empty() {
            return Err(DedupError::InvalidConfig(
                "at least one hash field is required".into(),
            ));
        }
        let cache = ExactHashCache::new(config.cache_size)?;

        let (minhasher, index) = if config.enable_near_dup {
            if config.num_perm == 0 || config.num_shards == 0 || config.shingle_size == 0 {
                return Err(DedupError::InvalidConfig(format!(
                    "num_perm ({}), num_shards ({}) and shingle_size ({}) must be positive",
                    config.num_perm, config.num_shards, config.shingle_size
                )));
            }
            let index = match config.index_path {
                Some(ref path) => {
                    ShardedLshIndex::load(path, threshold, config.num_perm, config.num_shards)
                }
                None => ShardedLshIndex::new(threshold, config.num_perm, config.num_shards),
            };
            (
                Some(MinHasher::new(config.num_perm, config.shingle_size)),
                Some(index),
            )
        } else {
            (None, None)
        };

        if let Some(ref index) = index {
            let params = index.params();
            info!(
                "Dedup engine ready: cache {} entries, {} indexed documents, {} bands x {} rows over {} shards",
                config.cache_size,
                index.len(),
                params.bands,
                params.rows,
                index.num_shards()
            );
        } else {
            info!(
                "Dedup engine ready: cache {} entries, near-duplicate detection off",
                config.cache_size
            );
        }

        Ok(Self {
            config,
            cache,
            minhasher,
            index,
            stats: DedupStats::default(),
        })
    }

    /// Classify a document as exact duplicate, near duplicate or unique.
    ///
    /// Unique documents are recorded in the cache and the index.
    pub fn process_document(&mut self, text: &str, url: &str) -> DedupOutcome {
        self.stats.processed += 1;
        let text_hash = content_hash(&self.config.hash_fields, text, url);

        if let Some(first_url) = self.cache.first_url(&text_hash) {
            let similar_url = first_url.to_string();
            self.stats.exact_duplicates += 1;
            debug!("Exact duplicate: {} matches {}", url, similar_url);
            return DedupOutcome {
                is_duplicate: true,
                duplicate_type: Some(DuplicateType::Exact),
                similar_url: Some(similar_url),
                similarity: Some(1.0),
                text_hash,
                signature: None,
            };
        }
        self.cache.insert(text_hash.clone(), url.to_string());

        let signature = self
            .minhasher
            .as_ref()
            .and_then(|hasher| hasher.signature(text));

        if let (Some(index), Some(sig)) = (self.index.as_mut(), signature.as_ref()) {
            if let Some(found) = index.query(sig) {
                self.stats.near_duplicates += 1;
                debug!(
                    "Near duplicate: {} matches {} (similarity {:.3})",
                    url, found.key, found.similarity
                );
                return DedupOutcome {
                    is_duplicate: true,
                    duplicate_type: Some(DuplicateType::Near),
                    similar_url: Some(found.key),
                    similarity: Some(found.similarity),
                    text_hash,
                    signature,
                };
            }
            if let Err(e) = index.insert(url, sig.clone()) {
                warn!("Failed to index signature for {}: {}", url, e);
            }
        }

        self.stats.unique += 1;
        DedupOutcome {
            is_duplicate: false,
            duplicate_type: None,
            similar_url: None,
            similarity: None,
            text_hash,
            signature,
        }
    }

    /// Persist the near-duplicate index. Returns false when there is nothing to save to.
    pub fn save_index(&self) -> DedupResult<bool> {
        match (&self.index, &self.config.index_path) {
            (Some(index), Some(path)) => {
                index.save(path)?;
                info!(
                    "Saved near-duplicate index with {} documents",
                    index.len()
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn index_len(&self) -> usize {
        self.index.as_ref().map_or(0, ShardedLshIndex::len)
    }

    pub fn index(&self) -> Option<&ShardedLshIndex> {
        self.index.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DedupConfig {
        DedupConfig {
            hash_fields: vec![HashField::Text],
            num_perm: 64,
            num_shards: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let zero_cache = DedupConfig {
            cache_size: 0,
            ..config()
        };
        assert!(matches!(
            DedupEngine::new(zero_cache),
            Err(DedupError::InvalidCacheSize(0))
        ));

        for threshold in [0.0, -0.1, 1.5, f64::NAN] {
            let cfg = DedupConfig {
                similarity_threshold: threshold,
                ..config()
            };
            assert!(matches!(
                DedupEngine::new(cfg),
                Err(DedupError::InvalidThreshold(_))
            ));
        }

        let no_fields = DedupConfig {
            hash_fields: vec![],
            ..config()
        };
        assert!(matches!(
            DedupEngine::new(no_fields),
            Err(DedupError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_exact_duplicate_reports_first_url() {
        let mut engine = DedupEngine::new(config()).unwrap();
        let first = engine.process_document("same body text here", "https://a/1");
        assert!(!first.is_duplicate);

        let second = engine.process_document("same body text here", "https://a/2");
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_type, Some(DuplicateType::Exact));
        assert_eq!(second.similar_url.as_deref(), Some("https://a/1"));
        assert_eq!(second.text_hash, first.text_hash);
        assert_eq!(engine.stats().exact_duplicates, 1);
    }

    #[test]
    fn test_empty_text_skips_near_dup() {
        let mut engine = DedupEngine::new(config()).unwrap();
        let outcome = engine.process_document("", "https://a/empty");
        assert!(!outcome.is_duplicate);
        assert!(outcome.signature.is_none());
        assert_eq!(engine.index_len(), 0);
    }

    #[test]
    fn test_near_dup_disabled_has_no_index() {
        let mut engine = DedupEngine::new(DedupConfig {
            enable_near_dup: false,
            ..config()
        })
        .unwrap();
        let outcome = engine.process_document("one two three four five", "https://a/1");
        assert!(outcome.signature.is_none());
        assert!(engine.index().is_none());
        assert!(!engine.save_index().unwrap());
    }
}
