//! Fixed-length bloom filter used to sketch which service ids a sender is
//! advertising for, so a receiver can skip GATT-reading headers that
//! couldn't possibly be relevant.
//!
//! Uses the standard double-hashing scheme `h_i = h1 + i*h2 (mod m)` with a
//! fixed number of hash rounds, rather than hashing with `k` independent
//! seeds the way a naive implementation (or this crate's sibling message
//! deduplicator) would.

use crate::wire::BLOOM_FILTER_BYTE_LENGTH;
use sha2::{Digest, Sha256};

/// Number of hash rounds per `add`/`may_contain` call. Fixed at compile
/// time; see the design notes for why this value was picked without
/// measured wire traffic to tune against.
const HASH_ROUNDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<bool>,
}

impl BloomFilter {
    pub fn new() -> Self {
        Self {
            bits: vec![false; BLOOM_FILTER_BYTE_LENGTH * 8],
        }
    }

    pub fn from_bytes(bytes: [u8; BLOOM_FILTER_BYTE_LENGTH]) -> Self {
        let mut bits = vec![false; BLOOM_FILTER_BYTE_LENGTH * 8];
        for (byte_idx, byte) in bytes.iter().enumerate() {
            for bit_idx in 0..8 {
                bits[byte_idx * 8 + bit_idx] = (byte >> bit_idx) & 1 == 1;
            }
        }
        Self { bits }
    }

    pub fn to_bytes(&self) -> [u8; BLOOM_FILTER_BYTE_LENGTH] {
        let mut out = [0u8; BLOOM_FILTER_BYTE_LENGTH];
        for (byte_idx, byte) in out.iter_mut().enumerate() {
            let mut v = 0u8;
            for bit_idx in 0..8 {
                if self.bits[byte_idx * 8 + bit_idx] {
                    v |= 1 << bit_idx;
                }
            }
            *byte = v;
        }
        out
    }

    pub fn add(&mut self, service_id: &str) {
        let m = self.bits.len() as u32;
        let (h1, h2) = double_hash(service_id.as_bytes());
        for i in 0..HASH_ROUNDS as u32 {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % m;
            self.bits[idx as usize] = true;
        }
    }

    pub fn may_contain(&self, service_id: &str) -> bool {
        let m = self.bits.len() as u32;
        let (h1, h2) = double_hash(service_id.as_bytes());
        (0..HASH_ROUNDS as u32).all(|i| {
            let idx = h1.wrapping_add(i.wrapping_mul(h2)) % m;
            self.bits[idx as usize]
        })
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn double_hash(data: &[u8]) -> (u32, u32) {
    let digest = Sha256::digest(data);
    let h1 = u32::from_be_bytes(digest[0..4].try_into().expect("4 bytes"));
    let h2 = u32::from_be_bytes(digest[4..8].try_into().expect("4 bytes"));
    // A zero second hash degenerates double hashing into repeating the same
    // index; nudge it odd so every round lands on a distinct bucket.
    (h1, h2 | 1)
}
