//! Packed reachability bits.
//!
//! ```text
//! BitField:
//!   words: Vec<u64>  ──→  [b₀b₁b₂...b₆₃|b₆₄b₆₅...b₁₂₇|...]
//!
//! index i  ↦  words[i / 64] bit (i % 64)
//! ```
//!
//! The capacity is always a multiple of 64, so there are no padding bits to
//! mask. Storage is allocated fallibly and zeroed up front; nothing in the
//! closure computation ever clears a bit once it is set.

use crate::error::{ClosureError, Result};
use crate::maps::WORD_BITS;
use crate::popcount;

/// Fixed-capacity bit array over `[0, capacity)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitField {
    capacity: u64,
    words: Vec<u64>,
}

impl BitField {
    /// Allocate a zeroed field. `capacity` must be a multiple of 64.
    pub fn try_new(capacity: u64) -> Result<Self> {
        if capacity % WORD_BITS != 0 {
            return Err(ClosureError::Unaligned { value: capacity, unit: WORD_BITS });
        }
        let words = zeroed_words(Self::word_count(capacity))?;
        Ok(Self { capacity, words })
    }

    /// Wrap existing words (e.g. from a snapshot).
    pub fn from_words(words: Vec<u64>) -> Self {
        Self {
            capacity: words.len() as u64 * WORD_BITS,
            words,
        }
    }

    /// Number of u64 words needed for `capacity` bits.
    #[inline(always)]
    pub const fn word_count(capacity: u64) -> usize {
        capacity.div_ceil(WORD_BITS) as usize
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Read a bit. Panics if `i >= capacity`.
    #[inline]
    pub fn get(&self, i: u64) -> bool {
        (self.words[(i / WORD_BITS) as usize] >> (i % WORD_BITS)) & 1 == 1
    }

    /// Set a bit. Panics if `i >= capacity`.
    #[inline]
    pub fn set(&mut self, i: u64) {
        self.words[(i / WORD_BITS) as usize] |= 1u64 << (i % WORD_BITS);
    }

    /// Number of set bits in `[min, max]` (inclusive).
    pub fn count_ones_range(&self, min: u64, max: u64) -> u64 {
        if max < min {
            return 0;
        }
        debug_assert!(max < self.capacity);
        let first = (min / WORD_BITS) as usize;
        let last = (max / WORD_BITS) as usize;
        let lo_mask = !0u64 << (min % WORD_BITS);
        let hi_mask = !0u64 >> (WORD_BITS - 1 - max % WORD_BITS);

        if first == last {
            return (self.words[first] & lo_mask & hi_mask).count_ones() as u64;
        }

        let head = (self.words[first] & lo_mask).count_ones() as u64;
        let tail = (self.words[last] & hi_mask).count_ones() as u64;
        head + popcount::popcount_words(&self.words[first + 1..last]) + tail
    }

    /// Number of set bits over the whole field.
    pub fn count_ones(&self) -> u64 {
        popcount::popcount_words(&self.words)
    }

    /// Indices of unset bits in `[min, max]`, ascending.
    pub fn unset_indices(&self, min: u64, max: u64) -> impl Iterator<Item = u64> + '_ {
        let (first, last) = if max < min {
            (1, 0)
        } else {
            ((min / WORD_BITS) as usize, (max / WORD_BITS) as usize)
        };
        (first..=last).flat_map(move |w| {
            let mut bits = !self.words[w];
            let base = w as u64 * WORD_BITS;
            std::iter::from_fn(move || {
                while bits != 0 {
                    let tz = bits.trailing_zeros() as u64;
                    bits &= bits - 1; // Clear lowest set bit
                    let idx = base + tz;
                    if idx >= min && idx <= max {
                        return Some(idx);
                    }
                }
                None
            })
        })
    }

    /// Zero every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Reserve room for `new_capacity` bits without changing the capacity.
    pub fn reserve(&mut self, new_capacity: u64) -> Result<()> {
        if new_capacity % WORD_BITS != 0 {
            return Err(ClosureError::Unaligned { value: new_capacity, unit: WORD_BITS });
        }
        let extra = Self::word_count(new_capacity).saturating_sub(self.words.len());
        self.words.try_reserve_exact(extra).map_err(|_| ClosureError::Allocation {
            what: "bitfield",
            bytes: extra as u64 * 8,
        })
    }

    /// Widen to `new_capacity` bits, keeping existing bits.
    pub fn grow(&mut self, new_capacity: u64) -> Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }
        self.reserve(new_capacity)?;
        self.words.resize(Self::word_count(new_capacity), 0);
        self.capacity = new_capacity;
        Ok(())
    }
}

/// Fallibly allocate `n` zeroed words.
pub(crate) fn zeroed_words(n: usize) -> Result<Vec<u64>> {
    let mut words = Vec::new();
    words.try_reserve_exact(n).map_err(|_| ClosureError::Allocation {
        what: "bitfield",
        bytes: n as u64 * 8,
    })?;
    words.resize(n, 0);
    Ok(words)
}
