//! Bloom filter used to prefilter tombstone lookups.
//!
//! Buffers and shards keep one filter over the records (or keys) of their
//! tombstones so that the common "is this record deleted?" miss avoids a
//! scan. Inserts are concurrent-safe; `clear` is only called while the
//! owning buffer is quiescent at the cleared range.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;

/// False-positive rate targeted by tombstone filters.
pub const TOMBSTONE_FPR: f64 = 0.01;

#[derive(Debug)]
pub struct BloomFilter {
    words: Vec<AtomicU64>,
    bit_count: u64,
    hash_count: u32,
    hashers: [RandomState; 2],
}

impl BloomFilter {
    /// Size a filter for `expected` insertions at false-positive rate `fpr`.
    pub fn new(fpr: f64, expected: usize) -> Self {
        let n = expected.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * fpr.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        let words = (0..bit_count.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            words,
            bit_count,
            hash_count,
            hashers: [
                RandomState::with_seeds(0x9d3c, 0x1b7a, 0x5f21, 0x8e44),
                RandomState::with_seeds(0x40e7, 0x72d9, 0xa1c3, 0x0b58),
            ],
        }
    }

    pub fn insert<T: Hash + ?Sized>(&self, item: &T) {
        let (h1, h2) = self.hash_pair(item);
        for i in 0..self.hash_count as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count;
            self.words[(bit / 64) as usize].fetch_or(1 << (bit % 64), Ordering::Relaxed);
        }
    }

    pub fn contains<T: Hash + ?Sized>(&self, item: &T) -> bool {
        let (h1, h2) = self.hash_pair(item);
        (0..self.hash_count as u64).all(|i| {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count;
            self.words[(bit / 64) as usize].load(Ordering::Relaxed) & (1 << (bit % 64)) != 0
        })
    }

    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    fn hash_pair<T: Hash + ?Sized>(&self, item: &T) -> (u64, u64) {
        (
            self.hashers[0].hash_one(item),
            // an even second hash would cycle through a fraction of the bits
            self.hashers[1].hash_one(item) | 1,
        )
    }
}
