//! Bounded exact-hash cache.
//!
//! Maps a content hash to the first URL seen with it. Pure LRU: lookups refresh
//! recency and inserts evict the least recently used hash at capacity. A hash that
//! has been evicted is simply unknown again; the ledger's text-hash index remains
//! the authority across runs.

use std::num::NonZeroUsize;

use lru::LruCache;

use super::{DedupError, DedupResult};

pub struct ExactHashCache {
    entries: LruCache<String, String>,
}

impl ExactHashCache {
    pub fn new(maxsize: usize) -> DedupResult<Self> {
        let capacity = NonZeroUsize::new(maxsize).ok_or(DedupError::InvalidCacheSize(maxsize))?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }

    /// Membership test that also marks the hash as recently used.
    pub fn contains(&mut self, hash: &str) -> bool {
        self.entries.get(hash).is_some()
    }

    /// First URL recorded for `hash`, refreshing its recency.
    pub fn first_url(&mut self, hash: &str) -> Option<&str> {
        self.entries.get(hash).map(String::as_str)
    }

    /// Record `hash`. Returns the hash evicted to make room, if any.
    pub fn insert(&mut self, hash: String, url: String) -> Option<String> {
        match self.entries.push(hash.clone(), url) {
            Some((evicted, _)) if evicted != hash => Some(evicted),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(cache: &mut ExactHashCache, hash: &str) -> Option<String> {
        cache.insert(hash.to_string(), format!("https://example.com/{hash}"))
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            ExactHashCache::new(0),
            Err(DedupError::InvalidCacheSize(0))
        ));
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut cache = ExactHashCache::new(2).unwrap();
        assert_eq!(insert(&mut cache, "A"), None);
        assert_eq!(insert(&mut cache, "B"), None);
        assert_eq!(insert(&mut cache, "C"), Some("A".to_string()));

        assert!(!cache.contains("A"));
        assert!(cache.contains("C"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_contains_refreshes_recency() {
        let mut cache = ExactHashCache::new(2).unwrap();
        insert(&mut cache, "A");
        insert(&mut cache, "B");
        assert!(cache.contains("A"));
        assert_eq!(insert(&mut cache, "C"), Some("B".to_string()));
        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
    }

    #[test]
    fn test_never_grows_past_capacity() {
        let mut cache = ExactHashCache::new(16).unwrap();
        for i in 0..100 {
            insert(&mut cache, &format!("h{i}"));
            assert!(cache.len() <= 16);
        }
        assert_eq!(cache.len(), 16);
        assert!(!cache.contains("h0"));
        assert!(cache.contains("h99"));
    }

    #[test]
    fn test_reinsert_replaces_url_without_eviction() {
        let mut cache = ExactHashCache::new(2).unwrap();
        insert(&mut cache, "A");
        assert_eq!(cache.insert("A".into(), "https://other/".into()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.first_url("A"), Some("https://other/"));
    }
}
