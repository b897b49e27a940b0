//! Stable string hashing used by the categorical feature transform.
//!
//! `std`'s `DefaultHasher` is not guaranteed stable across releases, so the
//! categorical slots are derived from an explicit MurmurHash3 (x86, 32-bit).

use crate::constants::features::HASH_SEED;
use crate::types::FeatureValue;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 x86 32-bit of `bytes` with `seed`.
pub fn murmur3_32(bytes: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut blocks = bytes.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= scramble(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (idx, byte) in tail.iter().enumerate() {
            k ^= (*byte as u32) << (8 * idx);
        }
        h ^= scramble(k);
    }

    h ^= bytes.len() as u32;
    fmix32(h)
}

fn scramble(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Signed hash of `value`, as a feature hasher sees it.
pub fn signed_hash(value: &str) -> i32 {
    murmur3_32(value.as_bytes(), HASH_SEED) as i32
}

/// Bucket index and sign contributed by `value` to an `N`-slot vector.
pub fn slot_for(value: &str, slots: usize) -> (usize, FeatureValue) {
    let h = signed_hash(value);
    let index = ((h as i64).unsigned_abs() % slots as u64) as usize;
    let sign = if h < 0 { -1.0 } else { 1.0 };
    (index, sign)
}

/// Hash every value into a fixed `N`-slot vector, accumulating signed counts.
pub fn hashed_slots<const N: usize, S: AsRef<str>>(values: &[S]) -> [FeatureValue; N] {
    let mut slots = [0.0; N];
    for value in values {
        let (index, sign) = slot_for(value.as_ref(), N);
        slots[index] += sign;
    }
    slots
}
