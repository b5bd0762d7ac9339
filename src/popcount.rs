//! Nibble-lookup population count.
//!
//! Every byte is split into its low and high nibble and each nibble is looked
//! up in a 16-entry table of bit counts. On x86_64 with AVX2 the table lives in
//! a 256-bit register and 32 bytes are looked up per `vpshufb`; byte counters
//! are flushed into 64-bit lanes with `vpsadbw` every 8 iterations, before any
//! byte counter can exceed `8 × 8 = 64`.
//!
//! The portable path walks the same table one byte at a time. Both produce
//! exactly the naive per-bit count.

/// Bit count of every 4-bit value.
pub const NIBBLE_POPCOUNT: [u8; 16] = [0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4];

/// Count set bits in `words` with the best available kernel.
pub fn popcount_words(words: &[u64]) -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        if avx2::is_available() {
            // Safety: AVX2 support was just verified.
            return unsafe { avx2::popcount_words_avx2(words) };
        }
    }

    popcount_words_portable(words)
}

/// Portable nibble-table count.
#[inline]
pub fn popcount_words_portable(words: &[u64]) -> u64 {
    words
        .iter()
        .map(|w| {
            w.to_le_bytes()
                .iter()
                .map(|&b| (NIBBLE_POPCOUNT[(b & 0x0f) as usize] + NIBBLE_POPCOUNT[(b >> 4) as usize]) as u64)
                .sum::<u64>()
        })
        .sum()
}

// ============================================================================
// SIMD ACCELERATION
// ============================================================================

#[cfg(target_arch = "x86_64")]
pub mod avx2 {
    //! AVX2 `vpshufb` nibble lookup, 32 bytes per step.

    use super::popcount_words_portable;
    use std::arch::x86_64::*;

    /// Words per 256-bit load.
    const LANE_WORDS: usize = 4;
    /// Loads accumulated in byte counters before flushing with `vpsadbw`.
    const FLUSH_EVERY: usize = 8;

    /// Check if AVX2 is available at runtime.
    pub fn is_available() -> bool {
        is_x86_feature_detected!("avx2")
    }

    /// # Safety
    /// Requires AVX2 support. Check with [`is_available`].
    #[target_feature(enable = "avx2")]
    pub unsafe fn popcount_words_avx2(words: &[u64]) -> u64 {
        let lookup = _mm256_setr_epi8(
            0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4, //
            0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4,
        );
        let low_mask = _mm256_set1_epi8(0x0f);
        let zero = _mm256_setzero_si256();
        let mut acc = _mm256_setzero_si256();

        let mut blocks = words.chunks_exact(LANE_WORDS * FLUSH_EVERY);
        for block in blocks.by_ref() {
            let mut local = _mm256_setzero_si256();
            for lane in block.chunks_exact(LANE_WORDS) {
                let data = _mm256_loadu_si256(lane.as_ptr() as *const __m256i);
                let lo = _mm256_and_si256(data, low_mask);
                let hi = _mm256_and_si256(_mm256_srli_epi16(data, 4), low_mask);
                local = _mm256_add_epi8(local, _mm256_shuffle_epi8(lookup, lo));
                local = _mm256_add_epi8(local, _mm256_shuffle_epi8(lookup, hi));
            }
            acc = _mm256_add_epi64(acc, _mm256_sad_epu8(local, zero));
        }

        let mut lanes = [0u64; LANE_WORDS];
        _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, acc);

        lanes.iter().sum::<u64>() + popcount_words_portable(blocks.remainder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(words: &[u64]) -> u64 {
        let mut n = 0;
        for w in words {
            for bit in 0..64 {
                n += (w >> bit) & 1;
            }
        }
        n
    }

    #[test]
    fn test_nibble_table() {
        for (v, &c) in NIBBLE_POPCOUNT.iter().enumerate() {
            assert_eq!(c as u32, (v as u32).count_ones());
        }
    }

    #[test]
    fn test_portable_matches_naive() {
        let words: Vec<u64> = (0..97u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
        assert_eq!(popcount_words_portable(&words), naive(&words));
        assert_eq!(popcount_words_portable(&[]), 0);
        assert_eq!(popcount_words_portable(&[u64::MAX; 3]), 192);
    }

    #[test]
    fn test_dispatch_matches_naive() {
        // Sizes around the 32-word flush block
        for len in [0usize, 1, 3, 4, 31, 32, 33, 64, 100, 257] {
            let words: Vec<u64> = (0..len as u64)
                .map(|i| i.wrapping_mul(0xD1B5_4A32_D192_ED03) ^ (i << 7))
                .collect();
            assert_eq!(popcount_words(&words), naive(&words), "len {}", len);
        }
        let full = vec![u64::MAX; 1024];
        assert_eq!(popcount_words(&full), 1024 * 64);
    }
}
