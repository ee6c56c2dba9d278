//! Sharded LSH index over MinHash signatures, persisted as JSON.
//!
//! Each signature is split into `bands` of `rows` values; documents sharing any band
//! bucket become candidates and are confirmed by estimated Jaccard similarity.
//! Bucket tables are spread over shards by bucket hash. The index grows without bound.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::minhash::MinHashSignature;
use super::{DedupError, DedupResult};

const INDEX_FORMAT_VERSION: u32 = 1;

const INTEGRATION_STEPS: usize = 100;

/// Band/row split of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    pub bands: usize,
    pub rows: usize,
}

fn integrate(f: impl Fn(f64) -> f64, a: f64, b: f64) -> f64 {
    if b <= a {
        return 0.0;
    }
    let h = (b - a) / INTEGRATION_STEPS as f64;
    let mut area = 0.5 * (f(a) + f(b));
    for i in 1..INTEGRATION_STEPS {
        area += f(a + h * i as f64);
    }
    area * h
}

/// Band/row split minimizing the equally weighted false positive and false
/// negative probability mass around `threshold`.
pub fn optimal_params(threshold: f64, num_perm: usize) -> LshParams {
    let mut best = LshParams { bands: 1, rows: 1 };
    let mut min_error = f64::INFINITY;

    for bands in 1..=num_perm {
        for rows in 1..=(num_perm / bands) {
            let (b, r) = (bands as f64, rows as f64);
            let false_positive = integrate(|s| 1.0 - (1.0 - s.powf(r)).powf(b), 0.0, threshold);
            let false_negative = integrate(|s| (1.0 - s.powf(r)).powf(b), threshold, 1.0);
            let error = 0.5 * false_positive + 0.5 * false_negative;
            if error < min_error {
                min_error = error;
                best = LshParams { bands, rows };
            }
        }
    }
    best
}

/// Best match returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMatch {
    pub key: String,
    pub similarity: f64,
}

type BucketKey = (u32, u64);

pub struct ShardedLshIndex {
    params: LshParams,
    threshold: f64,
    num_perm: usize,
    shards: Vec<HashMap<BucketKey, Vec<String>>>,
    signatures: HashMap<String, MinHashSignature>,
}

#[derive(Serialize, Deserialize)]
struct PersistedBucket {
    band: u32,
    hash: u64,
    keys: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    num_perm: usize,
    threshold: f64,
    params: LshParams,
    num_shards: usize,
    signatures: BTreeMap<String, MinHashSignature>,
    shards: Vec<Vec<PersistedBucket>>,
}

impl ShardedLshIndex {
    pub fn new(threshold: f64, num_perm: usize, num_shards: usize) -> Self {
        Self {
            params: optimal_params(threshold, num_perm),
            threshold,
            num_perm,
            shards: (0..num_shards.max(1)).map(|_| HashMap::new()).collect(),
            signatures: HashMap::new(),
        }
    }

    pub fn params(&self) -> LshParams {
        self.params
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.signatures.contains_key(key)
    }

    /// Bucket entries held by each shard.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|shard| shard.values().map(Vec::len).sum())
            .collect()
    }

    fn band_keys(&self, signature: &MinHashSignature) -> Vec<BucketKey> {
        let values = signature.values();
        (0..self.params.bands)
            .map(|band| {
                let start = band * self.params.rows;
                let mut hasher = blake3::Hasher::new();
                for value in &values[start..start + self.params.rows] {
                    hasher.update(&value.to_le_bytes());
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
                (band as u32, u64::from_le_bytes(bytes))
            })
            .collect()
    }

    fn shard_of(&self, bucket_hash: u64) -> usize {
        (bucket_hash % self.shards.len() as u64) as usize
    }

    fn check_length(&self, signature: &MinHashSignature) -> DedupResult<()> {
        if signature.len() != self.num_perm {
            return Err(DedupError::SignatureLength {
                expected: self.num_perm,
                actual: signature.len(),
            });
        }
        Ok(())
    }

    /// Most similar indexed document at or above the threshold.
    pub fn query(&self, signature: &MinHashSignature) -> Option<NearMatch> {
        if signature.len() != self.num_perm {
            return None;
        }

        let mut seen = HashSet::new();
        let mut best: Option<(&str, f64)> = None;
        for bucket in self.band_keys(signature) {
            let Some(keys) = self.shards[self.shard_of(bucket.1)].get(&bucket) else {
                continue;
            };
            for key in keys {
                if !seen.insert(key.as_str()) {
                    continue;
                }
                let Some(candidate) = self.signatures.get(key) else {
                    continue;
                };
                let similarity = signature.jaccard(candidate);
                if similarity >= self.threshold && best.map_or(true, |(_, s)| similarity > s) {
                    best = Some((key.as_str(), similarity));
                }
            }
        }

        best.map(|(key, similarity)| NearMatch {
            key: key.to_string(),
            similarity,
        })
    }

    /// Index `signature` under `key`. Returns false if the key was already present.
    pub fn insert(&mut self, key: &str, signature: MinHashSignature) -> DedupResult<bool> {
        self.check_length(&signature)?;
        if self.signatures.contains_key(key) {
            return Ok(false);
        }
        self.add_to_buckets(key, &signature);
        self.signatures.insert(key.to_string(), signature);
        Ok(true)
    }

    fn add_to_buckets(&mut self, key: &str, signature: &MinHashSignature) {
        for bucket in self.band_keys(signature) {
            let shard = self.shard_of(bucket.1);
            self.shards[shard]
                .entry(bucket)
                .or_default()
                .push(key.to_string());
        }
    }

    /// Load a persisted index, falling back to an empty one when the file is
    /// missing, unreadable or built with a different permutation count.
    pub fn load(path: &Path, threshold: f64, num_perm: usize, num_shards: usize) -> Self {
        let mut index = Self::new(threshold, num_perm, num_shards);

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No near-duplicate index at {}, starting empty", path.display());
                return index;
            }
            Err(e) => {
                warn!(
                    "Failed to read near-duplicate index {}: {}; starting empty",
                    path.display(),
                    e
                );
                return index;
            }
        };

        let persisted: PersistedIndex = match serde_json::from_slice(&data) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(
                    "Corrupt near-duplicate index {}: {}; starting empty",
                    path.display(),
                    e
                );
                return index;
            }
        };

        if persisted.version != INDEX_FORMAT_VERSION || persisted.num_perm != num_perm {
            warn!(
                "Near-duplicate index {} was built with format v{} and {} permutations (expected v{} and {}); starting empty",
                path.display(),
                persisted.version,
                persisted.num_perm,
                INDEX_FORMAT_VERSION,
                num_perm
            );
            return index;
        }

        let layout_matches =
            persisted.params == index.params && persisted.shards.len() == index.shards.len();

        for (key, signature) in persisted.signatures {
            if signature.len() == num_perm {
                if !layout_matches {
                    index.add_to_buckets(&key, &signature);
                }
                index.signatures.insert(key, signature);
            }
        }

        if layout_matches {
            for (shard, buckets) in index.shards.iter_mut().zip(persisted.shards) {
                for bucket in buckets {
                    shard.insert((bucket.band, bucket.hash), bucket.keys);
                }
            }
        } else {
            info!(
                "Rebuilt near-duplicate buckets for {} documents ({} shards, {} bands)",
                index.signatures.len(),
                index.shards.len(),
                index.params.bands
            );
        }

        index
    }

    /// Write the index atomically to `path`.
    pub fn save(&self, path: &Path) -> DedupResult<()> {
        let persisted = PersistedIndex {
            version: INDEX_FORMAT_VERSION,
            num_perm: self.num_perm,
            threshold: self.threshold,
            params: self.params,
            num_shards: self.shards.len(),
            signatures: self
                .signatures
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            shards: self
                .shards
                .iter()
                .map(|shard| {
                    shard
                        .iter()
                        .map(|(&(band, hash), keys)| PersistedBucket {
                            band,
                            hash,
                            keys: keys.clone(),
                        })
                        .collect()
                })
                .collect(),
        };

        let data = serde_json::to_vec(&persisted)?;
        crate::utils::write_atomic(path, &data).map_err(|source| DedupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "Saved near-duplicate index ({} documents) to {}",
            self.signatures.len(),
            path.display()
        );
        Ok(())
    }
}
