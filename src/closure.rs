//! Vectorized closure: bootstrap, block engine and window scheduling.
//!
//! ```text
//! [0, UNIT)          scalar bootstrap        (closure::bootstrap)
//! [UNIT, 2·UNIT)     window 1  ┐
//! [2·UNIT, 4·UNIT)   window 2  ├ ClosurePlan::fill over UNIT-sized blocks
//! [4·UNIT, 8·UNIT)   window 3  ┘ (closure::engine), split across workers
//! ...                              when large (closure::scheduler)
//! ```
//!
//! A window `[L, E)` only reads indices below `L`, which were completed by
//! earlier windows. Windows therefore run strictly in increasing order with a
//! join barrier between them, while blocks inside one window are independent.

pub mod bootstrap;
pub mod engine;
pub mod scheduler;

pub use engine::ClosurePlan;
pub use scheduler::PartitionedScheduler;

/// Half-open index range `[start, end)` computed in one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    /// Window following a completed prefix `[0, frontier)`.
    ///
    /// `end` is the smallest of `2·frontier`, the UNIT boundary past `target`,
    /// and `capacity`. Returns `None` when `target` is already covered.
    pub fn after(frontier: u64, target: u64, unit: u64, capacity: u64) -> Option<Self> {
        debug_assert!(frontier >= unit && frontier % unit == 0);
        if frontier > target || frontier >= capacity {
            return None;
        }
        let target_end = (target / unit + 1) * unit;
        let end = (2 * frontier).min(target_end).min(capacity);
        Some(Self { start: frontier, end })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}
