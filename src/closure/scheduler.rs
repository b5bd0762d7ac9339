//! Partitioned window execution on a reusable worker pool.
//!
//! ```text
//! words:  [ done (read-only, shared) | window (split into parts) | ... ]
//!                                     ├ part 0 ┤├ part 1 ┤├ part 2 ┤
//!                                       worker    worker    worker
//! ```
//!
//! Every part reads only the completed prefix and writes only its own words
//! (and the matching ledger bytes), so `split_at_mut` hands out disjoint
//! borrows and the `scope` join is the only synchronization needed.

use super::{ClosurePlan, Window};
use crate::config::ExecutionOpts;
use crate::error::{ClosureError, Result};
use crate::maps::WORD_BITS;
use crate::provenance::LEDGER_BYTES_PER_WORD;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Runs windows inline or split across a rayon pool.
pub struct PartitionedScheduler {
    opts: ExecutionOpts,
    unit: u64,
    pool: Option<ThreadPool>,
}

impl PartitionedScheduler {
    pub fn new(opts: ExecutionOpts, unit: u64) -> Self {
        Self { opts, unit, pool: None }
    }

    /// Replace the execution options. The pool is rebuilt if the thread count changes.
    pub fn set_options(&mut self, opts: ExecutionOpts) {
        if opts.num_threads != self.opts.num_threads {
            self.pool = None;
        }
        self.opts = opts;
    }

    pub fn options(&self) -> &ExecutionOpts {
        &self.opts
    }

    /// Number of parts a window of `bits` indices is split into.
    pub fn parts_for(&self, bits: u64) -> usize {
        if !self.opts.use_threads || self.opts.num_threads < 2 || bits < self.opts.parallel_threshold {
            return 1;
        }
        let units = (bits / self.unit).max(1) as usize;
        self.opts.num_threads.min(units)
    }

    fn pool(&mut self) -> Result<&ThreadPool> {
        if self.pool.is_none() {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.opts.num_threads)
                .thread_name(|i| format!("closure-worker-{i}"))
                .build()
                .map_err(|e| ClosureError::WorkerPool(e.to_string()))?;
            debug!(threads = self.opts.num_threads, "worker pool started");
            self.pool = Some(pool);
        }
        self.pool
            .as_ref()
            .ok_or_else(|| ClosureError::WorkerPool("pool unavailable".to_string()))
    }

    /// Fill one window of `words` (and `ledger`, when tracked).
    pub fn run_window(
        &mut self,
        plan: &ClosurePlan,
        window: Window,
        words: &mut [u64],
        ledger: Option<&mut [u8]>,
    ) -> Result<()> {
        let start = (window.start / WORD_BITS) as usize;
        let end = (window.end / WORD_BITS) as usize;
        let (done, rest) = words.split_at_mut(start);
        let done: &[u64] = done;
        let dst = &mut rest[..end - start];
        let tags = ledger.map(|l| &mut l[start * LEDGER_BYTES_PER_WORD..end * LEDGER_BYTES_PER_WORD]);

        let parts = self.parts_for(window.len());
        if parts == 1 {
            plan.fill(done, start, dst, tags);
            return Ok(());
        }

        let unit_words = (self.unit / WORD_BITS) as usize;
        let pieces = split_parts(dst, tags, start, unit_words, parts);
        debug!(start = window.start, end = window.end, parts = pieces.len(), "parallel window");

        let pool = self.pool()?;
        pool.scope(|s| {
            for (first_word, chunk, chunk_tags) in pieces {
                s.spawn(move |_| plan.fill(done, first_word, chunk, chunk_tags));
            }
        });
        Ok(())
    }
}

type Part<'a> = (usize, &'a mut [u64], Option<&'a mut [u8]>);

/// Split `dst` into `parts` unit-aligned, disjoint pieces of near-equal size.
fn split_parts<'a>(
    mut dst: &'a mut [u64],
    mut tags: Option<&'a mut [u8]>,
    first_word: usize,
    unit_words: usize,
    parts: usize,
) -> Vec<Part<'a>> {
    let units = dst.len().div_ceil(unit_words);
    let mut out = Vec::with_capacity(parts);
    let mut offset = 0;
    for i in 1..=parts {
        let boundary = if i == parts {
            dst.len() + offset
        } else {
            (units * i / parts * unit_words).min(offset + dst.len())
        };
        let take = boundary - offset;
        if take == 0 {
            continue;
        }
        let (head, tail) = std::mem::take(&mut dst).split_at_mut(take);
        dst = tail;
        let head_tags = match tags.take() {
            Some(t) => {
                let (h, rest) = t.split_at_mut(take * LEDGER_BYTES_PER_WORD);
                tags = Some(rest);
                Some(h)
            }
            None => None,
        };
        out.push((first_word + offset, head, head_tags));
        offset = boundary;
    }
    out
}
