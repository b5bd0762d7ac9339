//! Scale operators: index scatter `i ↦ k·i` over packed words.
//!
//! Given source words holding bits at indices `{i}`, a scale operator writes
//! `k` output words per source word holding bits at `{k·i}`, with no
//! interference between distinct source bits.
//!
//! ```text
//! source word s          →  output words k·s .. k·s + k - 1
//!   bit i (0 ≤ i < 64)   →    bit (k·i) of that k-word run
//! ```
//!
//! # Kernels
//!
//! | Kernel | Factor | Technique |
//! |--------|--------|-----------|
//! | [`SquareScatter`] | 2 | GF(2) squaring: `pclmulqdq(w, w)`, SWAR bit spread fallback |
//! | [`DepositScatter`] | any | `pdep` against periodic masks, bit-loop fallback |
//! | [`BitLoopScatter`] | any | explicit per-bit loop |
//!
//! Squaring works because over GF(2) the cross term `x^(i+j)` of two distinct
//! bits appears twice and cancels, leaving only `x^(2i)`. Deposit is a pure
//! scatter, so it works for any factor given a mask of that period.

use serde::{Deserialize, Serialize};

/// Index scatter by a fixed factor.
pub trait ScaleBy {
    /// The scale factor `k`.
    fn factor(&self) -> usize;

    /// Scatter `src` into `out`, which must hold `src.len() * factor()` words.
    /// Output words are overwritten.
    fn scatter(&self, src: &[u64], out: &mut [u64]);
}

/// Which kernels a closure plan may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelChoice {
    /// Runtime-detected accelerated kernels with portable fallbacks.
    #[default]
    Auto,
    /// Explicit per-bit loops only.
    Portable,
}

// ============================================================================
// PORTABLE BIT LOOP
// ============================================================================

/// Reference scatter: one iteration per set source bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitLoopScatter {
    factor: usize,
}

impl BitLoopScatter {
    pub fn new(factor: usize) -> Self {
        assert!(factor >= 1, "scale factor must be positive");
        Self { factor }
    }
}

impl ScaleBy for BitLoopScatter {
    #[inline]
    fn factor(&self) -> usize {
        self.factor
    }

    fn scatter(&self, src: &[u64], out: &mut [u64]) {
        debug_assert_eq!(out.len(), src.len() * self.factor);
        out.fill(0);
        for (s, &w) in src.iter().enumerate() {
            let base = s * self.factor * 64;
            let mut bits = w;
            while bits != 0 {
                let i = bits.trailing_zeros() as usize;
                let p = base + self.factor * i;
                out[p / 64] |= 1u64 << (p % 64);
                bits &= bits - 1;
            }
        }
    }
}

// ============================================================================
// FACTOR 2: GF(2) SQUARING
// ============================================================================

/// ×2 scatter via carry-less squaring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareScatter {
    clmul: bool,
}

impl SquareScatter {
    /// Use `pclmulqdq` when the CPU has it, the SWAR spread otherwise.
    pub fn detect() -> Self {
        Self { clmul: has_clmul() }
    }

    /// Force the SWAR spread.
    pub fn swar() -> Self {
        Self { clmul: false }
    }

    /// Whether the hardware carry-less multiply is in use.
    pub fn is_accelerated(&self) -> bool {
        self.clmul
    }
}

impl ScaleBy for SquareScatter {
    #[inline]
    fn factor(&self) -> usize {
        2
    }

    fn scatter(&self, src: &[u64], out: &mut [u64]) {
        debug_assert_eq!(out.len(), src.len() * 2);

        #[cfg(target_arch = "x86_64")]
        {
            if self.clmul {
                // Safety: constructed with `clmul` only after runtime detection.
                unsafe { x86::square_words_clmul(src, out) };
                return;
            }
        }

        for (&w, pair) in src.iter().zip(out.chunks_exact_mut(2)) {
            pair[0] = spread_bits_64(w as u32);
            pair[1] = spread_bits_64((w >> 32) as u32);
        }
    }
}

/// Spread the 32 bits of `x` into the even bit positions of a u64.
#[inline(always)]
pub fn spread_bits_64(x: u32) -> u64 {
    let mut x = x as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

// ============================================================================
// ANY FACTOR: PARALLEL BIT DEPOSIT
// ============================================================================

/// ×k scatter via `pdep` against periodic masks.
///
/// Output word `j` of a source word's `k`-word run receives source bits
/// `ceil(64j/k)..` at positions `{t : (64j + t) mod k = 0}`. For `k = 3`:
///
/// ```text
/// j = 0: shift  0, mask 0x9249249249249249 (22 bits)
/// j = 1: shift 22, mask 0x4924924924924924 (21 bits)
/// j = 2: shift 43, mask 0x2492492492492492 (21 bits)
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositScatter {
    factor: usize,
    masks: Vec<u64>,
    shifts: Vec<u32>,
    bmi2: bool,
}

impl DepositScatter {
    /// Masks for `factor`, hardware `pdep` when the CPU has BMI2.
    pub fn detect(factor: usize) -> Self {
        Self::build(factor, has_bmi2())
    }

    /// Masks for `factor` with the software deposit.
    pub fn software(factor: usize) -> Self {
        Self::build(factor, false)
    }

    fn build(factor: usize, bmi2: bool) -> Self {
        assert!(factor >= 1, "scale factor must be positive");
        let mut masks = Vec::with_capacity(factor);
        let mut shifts = Vec::with_capacity(factor);
        for j in 0..factor {
            let mut mask = 0u64;
            for t in 0..64 {
                if (64 * j + t) % factor == 0 {
                    mask |= 1u64 << t;
                }
            }
            // A non-empty mask starts below source bit 64; empty masks deposit nothing
            let shift = if mask == 0 { 0 } else { (64 * j).div_ceil(factor) as u32 };
            masks.push(mask);
            shifts.push(shift);
        }
        Self { factor, masks, shifts, bmi2 }
    }

    pub fn masks(&self) -> &[u64] {
        &self.masks
    }

    pub fn shifts(&self) -> &[u32] {
        &self.shifts
    }

    /// Whether hardware `pdep` is in use.
    pub fn is_accelerated(&self) -> bool {
        self.bmi2
    }
}

impl ScaleBy for DepositScatter {
    #[inline]
    fn factor(&self) -> usize {
        self.factor
    }

    fn scatter(&self, src: &[u64], out: &mut [u64]) {
        debug_assert_eq!(out.len(), src.len() * self.factor);

        #[cfg(target_arch = "x86_64")]
        {
            if self.bmi2 {
                // Safety: constructed with `bmi2` only after runtime detection.
                unsafe { x86::deposit_words_bmi2(src, out, &self.masks, &self.shifts) };
                return;
            }
        }

        for (&w, run) in src.iter().zip(out.chunks_exact_mut(self.factor)) {
            for ((slot, &mask), &shift) in run.iter_mut().zip(&self.masks).zip(&self.shifts) {
                *slot = pdep_u64(w >> shift, mask);
            }
        }
    }
}

/// Parallel bit deposit (software fallback).
/// Deposits contiguous low bits of `src` to positions marked by `mask`.
#[inline]
pub fn pdep_u64(src: u64, mask: u64) -> u64 {
    let mut result = 0u64;
    let mut m = mask;
    let mut k = 0;

    while m != 0 {
        let lsb = m.trailing_zeros();
        if (src >> k) & 1 == 1 {
            result |= 1u64 << lsb;
        }
        m &= m - 1;
        k += 1;
    }

    result
}

// ============================================================================
// KERNEL SELECTION
// ============================================================================

/// Closed set of scatter kernels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scatter {
    BitLoop(BitLoopScatter),
    Square(SquareScatter),
    Deposit(DepositScatter),
}

impl Scatter {
    /// Best kernel for `factor` under `choice`.
    pub fn select(factor: usize, choice: KernelChoice) -> Self {
        match choice {
            KernelChoice::Portable => Scatter::BitLoop(BitLoopScatter::new(factor)),
            KernelChoice::Auto if factor == 2 => Scatter::Square(SquareScatter::detect()),
            KernelChoice::Auto if has_bmi2() => Scatter::Deposit(DepositScatter::detect(factor)),
            KernelChoice::Auto => Scatter::BitLoop(BitLoopScatter::new(factor)),
        }
    }

    /// Short kernel name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Scatter::BitLoop(_) => "bit-loop",
            Scatter::Square(s) if s.is_accelerated() => "clmul",
            Scatter::Square(_) => "swar-spread",
            Scatter::Deposit(d) if d.is_accelerated() => "pdep",
            Scatter::Deposit(_) => "soft-pdep",
        }
    }
}

impl ScaleBy for Scatter {
    #[inline]
    fn factor(&self) -> usize {
        match self {
            Scatter::BitLoop(s) => s.factor(),
            Scatter::Square(s) => s.factor(),
            Scatter::Deposit(s) => s.factor(),
        }
    }

    #[inline]
    fn scatter(&self, src: &[u64], out: &mut [u64]) {
        match self {
            Scatter::BitLoop(s) => s.scatter(src, out),
            Scatter::Square(s) => s.scatter(src, out),
            Scatter::Deposit(s) => s.scatter(src, out),
        }
    }
}

/// Whether `pclmulqdq` is available at runtime.
pub fn has_clmul() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("pclmulqdq") && is_x86_feature_detected!("sse2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Whether BMI2 (`pdep`) is available at runtime.
pub fn has_bmi2() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("bmi2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Human-readable list of detected scatter features.
pub fn simd_features_string() -> String {
    let mut features = Vec::new();
    if has_clmul() {
        features.push("pclmulqdq");
    }
    if has_bmi2() {
        features.push("bmi2");
    }
    #[cfg(target_arch = "x86_64")]
    {
        if crate::popcount::avx2::is_available() {
            features.push("avx2");
        }
    }
    if features.is_empty() {
        "portable".to_string()
    } else {
        features.join(", ")
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    //! Hardware kernels. Callers verify CPU support first.

    use std::arch::x86_64::*;

    /// Square two source words per 128-bit register.
    ///
    /// # Safety
    /// Requires PCLMULQDQ and SSE2.
    #[target_feature(enable = "pclmulqdq,sse2")]
    pub unsafe fn square_words_clmul(src: &[u64], out: &mut [u64]) {
        let mut pairs = src.chunks_exact(2);
        let mut outs = out.chunks_exact_mut(4);

        for (pair, quad) in pairs.by_ref().zip(outs.by_ref()) {
            let v = _mm_loadu_si128(pair.as_ptr() as *const __m128i);
            let lo = _mm_clmulepi64_si128(v, v, 0x00);
            let hi = _mm_clmulepi64_si128(v, v, 0x11);
            _mm_storeu_si128(quad.as_mut_ptr() as *mut __m128i, lo);
            _mm_storeu_si128(quad.as_mut_ptr().add(2) as *mut __m128i, hi);
        }

        for (&w, tail) in pairs.remainder().iter().zip(outs.into_remainder().chunks_exact_mut(2)) {
            let v = _mm_set_epi64x(0, w as i64);
            let sq = _mm_clmulepi64_si128(v, v, 0x00);
            _mm_storeu_si128(tail.as_mut_ptr() as *mut __m128i, sq);
        }
    }

    /// # Safety
    /// Requires BMI2. Every shift must be below 64.
    #[target_feature(enable = "bmi2")]
    pub unsafe fn deposit_words_bmi2(src: &[u64], out: &mut [u64], masks: &[u64], shifts: &[u32]) {
        let factor = masks.len();
        for (&w, run) in src.iter().zip(out.chunks_exact_mut(factor)) {
            for j in 0..factor {
                run[j] = _pdep_u64(w >> shifts[j], masks[j]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_words(n: usize) -> Vec<u64> {
        let mut x = 0x243F_6A88_85A3_08D3u64;
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                x
            })
            .collect()
    }

    #[test]
    fn test_bit_loop_factor_3() {
        let src = [0b1011u64];
        let mut out = [0u64; 3];
        BitLoopScatter::new(3).scatter(&src, &mut out);
        // bits 0, 1, 3 -> 0, 3, 9
        assert_eq!(out, [0b10_0000_1001, 0, 0]);

        let src = [1u64 << 63];
        BitLoopScatter::new(3).scatter(&src, &mut out);
        // 189 = 2*64 + 61
        assert_eq!(out, [0, 0, 1u64 << 61]);
    }

    #[test]
    fn test_reference_masks() {
        let d = DepositScatter::software(3);
        assert_eq!(d.masks(), &[0x9249_2492_4924_9249, 0x4924_9249_2492_4924, 0x2492_4924_9249_2492]);
        assert_eq!(d.shifts(), &[0, 22, 43]);

        let d = DepositScatter::software(2);
        assert_eq!(d.masks(), &[0x5555_5555_5555_5555, 0x5555_5555_5555_5555]);
        assert_eq!(d.shifts(), &[0, 32]);
    }

    #[test]
    fn test_square_matches_bit_loop() {
        let src = sample_words(9);
        let mut expected = vec![0u64; 18];
        BitLoopScatter::new(2).scatter(&src, &mut expected);

        for kernel in [SquareScatter::swar(), SquareScatter::detect()] {
            let mut out = vec![0u64; 18];
            kernel.scatter(&src, &mut out);
            assert_eq!(out, expected, "accelerated: {}", kernel.is_accelerated());
        }
    }

    #[test]
    fn test_deposit_matches_bit_loop() {
        let src = sample_words(7);
        for factor in [2usize, 3, 5, 7, 12, 64, 100, 256] {
            let mut expected = vec![0u64; src.len() * factor];
            BitLoopScatter::new(factor).scatter(&src, &mut expected);

            for kernel in [DepositScatter::software(factor), DepositScatter::detect(factor)] {
                let mut out = vec![!0u64; src.len() * factor];
                kernel.scatter(&src, &mut out);
                assert_eq!(out, expected, "factor {} hw {}", factor, kernel.is_accelerated());
            }
        }
    }

    #[test]
    fn test_deposit_wide_factors_stay_in_range() {
        let src = [u64::MAX, 0x8000_0000_0000_0001, 0x0123_4567_89AB_CDEF];
        for factor in 65usize..=256 {
            let kernel = DepositScatter::software(factor);
            assert!(kernel.shifts().iter().all(|&s| s < 64), "factor {}", factor);
            for (&mask, &shift) in kernel.masks().iter().zip(kernel.shifts()) {
                if mask == 0 {
                    assert_eq!(shift, 0);
                }
            }

            let mut expected = vec![0u64; src.len() * factor];
            BitLoopScatter::new(factor).scatter(&src, &mut expected);
            for kernel in [kernel, DepositScatter::detect(factor)] {
                let mut out = vec![!0u64; src.len() * factor];
                kernel.scatter(&src, &mut out);
                assert_eq!(out, expected, "factor {} hw {}", factor, kernel.is_accelerated());
            }
        }
    }

    #[test]
    fn test_pdep_software() {
        assert_eq!(pdep_u64(0b101, 0b1110_0000), 0b1010_0000);
        assert_eq!(pdep_u64(!0, 0), 0);
        assert_eq!(pdep_u64(!0, 0x8000_0000_0000_0001), 0x8000_0000_0000_0001);
    }

    #[test]
    fn test_select() {
        assert_eq!(Scatter::select(3, KernelChoice::Portable).name(), "bit-loop");
        assert_eq!(Scatter::select(2, KernelChoice::Auto).factor(), 2);
        assert_eq!(Scatter::select(3, KernelChoice::Auto).factor(), 3);
    }
}
