//! Key hashing
//!
//! Stable 64-bit FNV-1a hash of a byte-string key. The index never looks at
//! it; it only decides which placement bucket a key belongs to.
//!
//! The output depends on nothing but the key bytes: no random seed, no
//! length prefix, no platform word size. A given key hashes to the same value
//! in every process for this format version.

use std::hash::{BuildHasher, Hasher};

/// FNV-1a 64-bit offset basis
pub const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// FNV-1a 64-bit prime
pub const FNV_PRIME: u64 = 0x100000001b3;

/// Hash a key to a stable 64-bit value
pub fn hash(key: &[u8]) -> u64 {
    let mut hasher = KeyHasher::new();
    hasher.write(key);
    hasher.finish()
}

/// Map a key onto one of `buckets` placement buckets
///
/// `buckets` must be non-zero.
pub fn bucket(key: &[u8], buckets: u64) -> u64 {
    hash(key) % buckets
}

/// FNV-1a hasher
#[derive(Debug, Clone, Copy)]
pub struct KeyHasher {
    state: u64,
}

impl KeyHasher {
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Start from a custom basis (for independent hash families)
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for KeyHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// `BuildHasher` so std collections can bucket keys with the same function
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildKeyHasher;

impl BuildHasher for BuildKeyHasher {
    type Hasher = KeyHasher;

    fn build_hasher(&self) -> KeyHasher {
        KeyHasher::new()
    }
}
