//! Probabilistic existence filter in front of the LRU index.
//!
//! A negative answer is authoritative; a positive answer must be confirmed
//! against the index. Bits are never cleared: removals only mark the filter
//! dirty and a later rebuild drops them.

use std::collections::hash_map::DefaultHasher;
use std::f64::consts::LN_2;
use std::hash::{Hash, Hasher};

/// Target false positive rate for the existence filter.
pub const FALSE_POSITIVE_RATE: f64 = 0.1;

/// A fixed-size Bloom filter over string keys using double hashing.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size a filter for `capacity` keys at the given false positive rate.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn with_capacity(capacity: usize, fp_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let m = (-(n * p.ln()) / (LN_2 * LN_2)).ceil().max(64.0);
        let k = ((m / n) * LN_2).round().clamp(1.0, 16.0);
        let num_bits = m as u64;
        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes: k as u32,
        }
    }

    /// Number of addressable bits.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of bit positions set per key.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn insert(&mut self, key: &str) {
        for bit in self.positions(key) {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// `false` means the key was never inserted.
    pub fn contains(&self, key: &str) -> bool {
        self.positions(key)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    fn positions(&self, key: &str) -> impl Iterator<Item = u64> + use<> {
        let (h1, h2) = hash_pair(key);
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

fn hash_pair(key: &str) -> (u64, u64) {
    let mut first = DefaultHasher::new();
    key.hash(&mut first);
    let h1 = first.finish();

    let mut second = DefaultHasher::new();
    0x9e37_79b9_7f4a_7c15_u64.hash(&mut second);
    key.hash(&mut second);
    // An odd step visits distinct positions for any power-of-two size.
    let h2 = second.finish() | 1;
    (h1, h2)
}
