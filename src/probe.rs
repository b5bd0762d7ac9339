//! Regression checksum over a prefix of the bit field.
//!
//! `s = 1; for each word w: s = s·w + 2` with wrapping arithmetic. This is a
//! fingerprint for comparing runs, not a hash with any collision guarantees.

use crate::bitfield::BitField;
use crate::error::{ClosureError, Result};
use crate::maps::WORD_BITS;

/// Fold words `[0, limit / 64)`. `limit` must be below the capacity.
pub fn checksum(bits: &BitField, limit: u64) -> Result<u64> {
    if limit >= bits.capacity() {
        return Err(ClosureError::ChecksumLimit {
            limit,
            capacity: bits.capacity(),
        });
    }
    let words = &bits.words()[..(limit / WORD_BITS) as usize];
    Ok(fold_words(words))
}

#[inline]
pub fn fold_words(words: &[u64]) -> u64 {
    words
        .iter()
        .fold(1u64, |s, &w| s.wrapping_mul(w).wrapping_add(2))
}
