//! Block closure engine.
//!
//! For a destination block of `B` words starting at word `w0`, map `a·x + b`
//! contributes the bits of every source `x` with `a·x + b` inside the block:
//!
//! ```text
//! x_lo = max(0, ⌈(64·w0 − b) / a⌉)       x_hi = ⌊(64·(w0 + B) − 1 − b) / a⌋
//!
//! source words  s_lo = x_lo / 64 ..= s_hi = x_hi / 64
//!        │ scatter ×a  (ScaleBy)
//!        ▼
//! spread word k  ──→  dest word a·s_lo + k + q   as  spread << r
//!                ──→  dest word a·s_lo + k + q + 1  as  spread >> (64 − r)
//!
//! where q = ⌊b / 64⌋ and r = b mod 64 (both floor semantics, so b < 0 works).
//! ```
//!
//! Writes outside the block are clipped. Since bit positions move linearly in
//! `x`, the clipped spill from neighbouring sources never lands inside the
//! block, so clipping is exact.
//!
//! # Provenance
//!
//! Without a ledger all maps are OR-merged straight into the block. With one,
//! each map's contribution is gathered separately and merged in priority
//! order: only bits not yet set in the block are tagged, so the result is the
//! same whichever worker handles the block.

use crate::maps::{MapSet, WORD_BITS};
use crate::provenance::{record_tag, LEDGER_BYTES_PER_WORD};
use crate::scale::{KernelChoice, ScaleBy, Scatter};

/// One map prepared for block evaluation.
#[derive(Clone, Debug)]
struct MapStep {
    /// Position of the map in the map set (the ledger tag is `index + 1`).
    index: usize,
    a: i64,
    b: i64,
    /// Word part of `b`, floor division.
    word_shift: i64,
    /// Bit part of `b`, in `0..64`.
    bit_shift: u32,
    kernel: Scatter,
}

/// Maps, kernels and priority order for filling windows of one run.
#[derive(Clone, Debug)]
pub struct ClosurePlan {
    steps: Vec<MapStep>,
    block_words: usize,
}

impl ClosurePlan {
    /// Build a plan. `priority` must be a permutation of the map indices and
    /// `unit` a multiple of 64.
    pub fn new(maps: &MapSet, unit: u64, kernel: KernelChoice, priority: &[usize]) -> Self {
        debug_assert_eq!(priority.len(), maps.len());
        debug_assert_eq!(unit % WORD_BITS, 0);
        let steps = priority
            .iter()
            .map(|&index| {
                let m = maps.maps()[index];
                MapStep {
                    index,
                    a: m.a,
                    b: m.b,
                    word_shift: m.b.div_euclid(WORD_BITS as i64),
                    bit_shift: m.b.rem_euclid(WORD_BITS as i64) as u32,
                    kernel: Scatter::select(m.a as usize, kernel),
                }
            })
            .collect();
        Self {
            steps,
            block_words: (unit / WORD_BITS) as usize,
        }
    }

    /// Words per block.
    #[inline]
    pub fn block_words(&self) -> usize {
        self.block_words
    }

    /// Kernel names in priority order, for logs.
    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.kernel.name()).collect()
    }

    /// Fill `dst`, which holds words `first_word..first_word + dst.len()`,
    /// reading sources from the completed prefix `done`.
    ///
    /// Bits already set in `dst` (seeds) are kept and never tagged. `ledger`,
    /// when given, covers exactly the words of `dst`.
    pub fn fill(&self, done: &[u64], first_word: usize, dst: &mut [u64], mut ledger: Option<&mut [u8]>) {
        debug_assert!(first_word >= done.len());
        if let Some(l) = ledger.as_deref() {
            debug_assert_eq!(l.len(), dst.len() * LEDGER_BYTES_PER_WORD);
        }

        let mut spread = Vec::new();
        let mut contrib = vec![0u64; if ledger.is_some() { self.block_words } else { 0 }];

        for (n, block) in dst.chunks_mut(self.block_words).enumerate() {
            let w0 = first_word + n * self.block_words;
            match ledger.as_deref_mut() {
                None => {
                    for step in &self.steps {
                        scatter_into(step, done, w0, block, &mut spread);
                    }
                }
                Some(ledger) => {
                    let base = n * self.block_words * LEDGER_BYTES_PER_WORD;
                    let tags = &mut ledger[base..base + block.len() * LEDGER_BYTES_PER_WORD];
                    let contrib = &mut contrib[..block.len()];
                    for step in &self.steps {
                        contrib.fill(0);
                        scatter_into(step, done, w0, contrib, &mut spread);
                        merge_tagged(block, contrib, tags, step.index);
                    }
                }
            }
        }
    }
}

/// OR the contribution of one map into `out`, which holds words `w0..w0 + out.len()`.
fn scatter_into(step: &MapStep, done: &[u64], w0: usize, out: &mut [u64], spread: &mut Vec<u64>) {
    let bits = WORD_BITS as i64;
    let lo = w0 as i64 * bits;
    let hi = (w0 + out.len()) as i64 * bits - 1;

    let x_lo = (-(step.b - lo).div_euclid(step.a)).max(0);
    let x_hi = (hi - step.b).div_euclid(step.a);
    if x_hi < x_lo {
        return;
    }

    let s_lo = (x_lo / bits) as usize;
    let s_hi = (x_hi / bits) as usize;
    debug_assert!(s_hi < done.len(), "window reads past the completed prefix");
    let src = &done[s_lo..=s_hi];

    let a = step.a as usize;
    spread.clear();
    spread.resize(src.len() * a, 0);
    step.kernel.scatter(src, spread);

    let first_dest = step.a * s_lo as i64 + step.word_shift - w0 as i64;
    let len = out.len() as i64;
    let r = step.bit_shift;
    for (k, &v) in spread.iter().enumerate() {
        if v == 0 {
            continue;
        }
        let d = first_dest + k as i64;
        if (0..len).contains(&d) {
            out[d as usize] |= v << r;
        }
        if r > 0 && (0..len).contains(&(d + 1)) {
            out[(d + 1) as usize] |= v >> (64 - r);
        }
    }
}

/// Merge one map's contribution into `block`, tagging newly set bits.
#[inline]
fn merge_tagged(block: &mut [u64], contrib: &[u64], tags: &mut [u8], map: usize) {
    for (j, (word, &c)) in block.iter_mut().zip(contrib).enumerate() {
        let mut fresh = c & !*word;
        *word |= fresh;
        while fresh != 0 {
            let bit = fresh.trailing_zeros() as usize;
            fresh &= fresh - 1;
            record_tag(tags, j * WORD_BITS as usize + bit, map);
        }
    }
}
