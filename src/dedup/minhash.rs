//! MinHash signatures over word shingles.
//!
//! Permutation coefficients come from a fixed seed, so signatures computed in
//! different processes (and different runs months apart) are comparable.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// 2^61 - 1, the modulus for the universal hash family.
const MERSENNE_PRIME: u64 = (1 << 61) - 1;

const PERMUTATION_SEED: u64 = 0x51_1FE2_0C0D_E5EE;

/// A MinHash signature: one minimum per permutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinHashSignature(Vec<u64>);

impl MinHashSignature {
    pub fn from_values(values: Vec<u64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }

    pub fn into_values(self) -> Vec<u64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Estimated Jaccard similarity. Signatures of different lengths never match.
    pub fn jaccard(&self, other: &MinHashSignature) -> f64 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let equal = self
            .0
            .iter()
            .zip(&other.0)
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.0.len() as f64
    }
}

pub struct MinHasher {
    shingle_size: usize,
    permutations: Vec<(u64, u64)>,
}

impl MinHasher {
    pub fn new(num_perm: usize, shingle_size: usize) -> Self {
        let mut state = PERMUTATION_SEED;
        let permutations = (0..num_perm)
            .map(|_| {
                let a = splitmix64(&mut state) % (MERSENNE_PRIME - 1) + 1;
                let b = splitmix64(&mut state) % MERSENNE_PRIME;
                (a, b)
            })
            .collect();
        Self {
            shingle_size: shingle_size.max(1),
            permutations,
        }
    }

    pub fn num_perm(&self) -> usize {
        self.permutations.len()
    }

    /// Hashed word shingles of `text`. Texts shorter than one shingle become a single shingle.
    pub fn shingles(&self, text: &str) -> HashSet<u64> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        if tokens.is_empty() {
            return HashSet::new();
        }
        if tokens.len() <= self.shingle_size {
            return HashSet::from([shingle_hash(&tokens.join(" "))]);
        }
        tokens
            .windows(self.shingle_size)
            .map(|window| shingle_hash(&window.join(" ")))
            .collect()
    }

    /// None when the text has no words.
    pub fn signature(&self, text: &str) -> Option<MinHashSignature> {
        let shingles = self.shingles(text);
        if shingles.is_empty() {
            return None;
        }

        let prime = u128::from(MERSENNE_PRIME);
        let mut mins = vec![u64::MAX; self.permutations.len()];
        for shingle in shingles {
            let x = u128::from(shingle % MERSENNE_PRIME);
            for (slot, &(a, b)) in mins.iter_mut().zip(&self.permutations) {
                let value = ((u128::from(a) * x + u128::from(b)) % prime) as u64;
                if value < *slot {
                    *slot = value;
                }
            }
        }
        Some(MinHashSignature(mins))
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn shingle_hash(shingle: &str) -> u64 {
    let digest = blake3::hash(shingle.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
