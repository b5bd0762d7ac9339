//! The closure run: one owner for the bit field, ledger, plan and workers.
//!
//! ```text
//! ClosureRun::new(config)         allocate + zero, place seeds
//!     │
//!     ├─ compute_till(opts)        bootstrap, then windows up to opts.max
//!     ├─ compute_till(opts)        resumes from max_reached + 1
//!     ├─ grow(capacity)            widen, keep every computed bit
//!     │
//!     └─ queries / exports         read-only over [0, max_reached]
//! ```
//!
//! # Example
//!
//! ```
//! use affine_closure::{ClosureRun, ComputeOpts, RunConfig};
//!
//! let mut run = ClosureRun::new(RunConfig::new(100_000, vec![1])).unwrap();
//! run.compute_till(&ComputeOpts::all()).unwrap();
//!
//! assert!(run.is_reachable_checked(3).unwrap());
//! assert!(!run.is_reachable_checked(2).unwrap());
//! assert_eq!(run.checksum(100_000).unwrap(), 15063046391347018756);
//! ```

use crate::bitfield::BitField;
use crate::closure::{bootstrap::bootstrap, ClosurePlan, PartitionedScheduler, Window};
use crate::config::{ComputeOpts, ExecutionOpts, RunConfig, Strategy};
use crate::error::{ClosureError, Result};
use crate::export;
use crate::maps::{MapSet, SCALAR_UNIT};
use crate::probe;
use crate::provenance::{ProvenanceLedger, ProvenancePolicy, Witness};
use crate::reference::ScalarRecurrence;
use crate::scale::KernelChoice;
use crate::snapshot::{Snapshot, SNAPSHOT_VERSION};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Indices resolved between progress checks on the reference strategy.
const REFERENCE_CHUNK: u64 = 1 << 20;

/// A single closure computation and everything it owns.
pub struct ClosureRun {
    maps: MapSet,
    seeds: Vec<u64>,
    unit: u64,
    strategy: Strategy,
    kernel: KernelChoice,
    policy: ProvenancePolicy,
    priority: Vec<usize>,
    bits: BitField,
    ledger: Option<ProvenanceLedger>,
    max_reached: i64,
    plan: Option<ClosurePlan>,
    scheduler: PartitionedScheduler,
}

impl ClosureRun {
    /// Validate `config`, allocate the bit field (and ledger) and place the seeds.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.execution.validate()?;
        let priority = config.provenance.priority(config.maps.len())?;
        let (strategy, unit) = resolve_strategy(&config.maps, config.strategy)?;
        let capacity = round_capacity(config.capacity, unit)?;

        let bits = BitField::try_new(capacity)?;
        let ledger = if config.provenance.is_enabled() {
            Some(ProvenanceLedger::try_new(capacity)?)
        } else {
            None
        };
        let plan = (strategy == Strategy::Vectorized)
            .then(|| ClosurePlan::new(&config.maps, unit, config.kernel, &priority));

        if let Some(plan) = &plan {
            debug!(kernels = ?plan.kernel_names(), "closure plan built");
        }
        info!(
            maps = %config.maps,
            capacity,
            unit,
            strategy = %strategy,
            "closure run created"
        );

        let mut run = ClosureRun {
            maps: config.maps,
            seeds: Vec::new(),
            unit,
            strategy,
            kernel: config.kernel,
            policy: config.provenance,
            priority,
            bits,
            ledger,
            max_reached: -1,
            plan,
            scheduler: PartitionedScheduler::new(config.execution, unit),
        };
        if !config.seeds.is_empty() {
            run.set_initial(&config.seeds)?;
        }
        Ok(run)
    }

    /// Mark `seeds` reachable. Only allowed before anything is computed.
    pub fn set_initial(&mut self, seeds: &[u64]) -> Result<()> {
        if self.max_reached >= 0 {
            return Err(ClosureError::Configuration(
                "seeds cannot change after computing; call clear_data first".to_string(),
            ));
        }
        let capacity = self.capacity();
        if let Some(&seed) = seeds.iter().find(|&&s| s >= capacity) {
            return Err(ClosureError::SeedOutOfRange { seed, capacity });
        }
        for &s in seeds {
            self.bits.set(s);
        }
        self.seeds.extend_from_slice(seeds);
        self.seeds.sort_unstable();
        self.seeds.dedup();
        Ok(())
    }

    /// Complete every index up to `opts.max` (or the whole capacity).
    pub fn compute_till(&mut self, opts: &ComputeOpts) -> Result<()> {
        self.compute_till_with_progress(opts, |_| {})
    }

    /// Like [`compute_till`](Self::compute_till), reporting the completed
    /// fraction at most once per `callback_frequency_secs` and once at the end.
    pub fn compute_till_with_progress<F>(&mut self, opts: &ComputeOpts, mut progress: F) -> Result<()>
    where
        F: FnMut(f64),
    {
        opts.execution.validate()?;
        let target = opts.max.unwrap_or(self.capacity() - 1);
        if target >= self.capacity() {
            return Err(ClosureError::TargetExceedsCapacity {
                target,
                capacity: self.capacity(),
            });
        }
        if self.seeds.is_empty() {
            warn!("no seeds set; only index-free maps can reach anything");
        }
        if target as i64 <= self.max_reached {
            progress(1.0);
            return Ok(());
        }

        self.scheduler.set_options(opts.execution.clone());
        let started = Instant::now();
        let mut ticker = ProgressTicker::new(opts.execution.callback_frequency_secs, target);

        match self.strategy {
            Strategy::Reference => self.compute_reference(target, &mut ticker, &mut progress),
            _ => self.compute_vectorized(target, &mut ticker, &mut progress)?,
        }

        info!(
            max_reached = self.max_reached,
            reachable = self.bits.count_ones_range(0, self.max_reached as u64),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "closure computed"
        );
        progress(1.0);
        Ok(())
    }

    fn compute_reference<F: FnMut(f64)>(&mut self, target: u64, ticker: &mut ProgressTicker, progress: &mut F) {
        let recurrence = ScalarRecurrence::new(&self.maps, &self.priority);
        let mut from = (self.max_reached + 1) as u64;
        while from <= target {
            let to = (from + REFERENCE_CHUNK - 1).min(target);
            recurrence.resolve_range(&mut self.bits, self.ledger.as_mut(), from, to);
            self.max_reached = to as i64;
            ticker.tick(to, progress);
            from = to + 1;
        }
    }

    fn compute_vectorized<F: FnMut(f64)>(
        &mut self,
        target: u64,
        ticker: &mut ProgressTicker,
        progress: &mut F,
    ) -> Result<()> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| ClosureError::Configuration("vectorized run without a plan".to_string()))?;

        if self.max_reached < self.unit as i64 - 1 {
            bootstrap(&mut self.bits, self.ledger.as_mut(), &self.maps, &self.priority, self.unit);
            self.max_reached = self.unit as i64 - 1;
            ticker.tick(self.unit - 1, progress);
        }

        let capacity = self.bits.capacity();
        let mut frontier = (self.max_reached + 1) as u64;
        while let Some(window) = Window::after(frontier, target, self.unit, capacity) {
            debug!(start = window.start, end = window.end, "window");
            let ledger = self.ledger.as_mut().map(|l| l.bytes_mut());
            self.scheduler
                .run_window(plan, window, self.bits.words_mut(), ledger)?;
            frontier = window.end;
            self.max_reached = frontier as i64 - 1;
            ticker.tick(frontier - 1, progress);
        }
        Ok(())
    }

    /// Forget all computed bits, tags and seeds.
    pub fn clear_data(&mut self) {
        self.bits.clear();
        if let Some(ledger) = &mut self.ledger {
            ledger.clear();
        }
        self.seeds.clear();
        self.max_reached = -1;
    }

    /// Widen the run to at least `capacity` indices, keeping computed bits.
    pub fn grow(&mut self, capacity: u64) -> Result<()> {
        let capacity = round_capacity(capacity, self.unit)?;
        if capacity <= self.capacity() {
            return Ok(());
        }
        // Both buffers must fit before either one changes length
        self.bits.reserve(capacity)?;
        if let Some(ledger) = &mut self.ledger {
            ledger.reserve(capacity)?;
        }
        self.bits.grow(capacity)?;
        if let Some(ledger) = &mut self.ledger {
            ledger.grow(capacity)?;
        }
        info!(capacity, max_reached = self.max_reached, "closure run grown");
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Largest completed index, `-1` before any computation.
    #[inline]
    pub fn max_reached(&self) -> i64 {
        self.max_reached
    }

    pub fn maps(&self) -> &MapSet {
        &self.maps
    }

    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.bits.capacity()
    }

    pub fn unit(&self) -> u64 {
        self.unit
    }

    /// Resolved strategy, never `Auto`.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn provenance_policy(&self) -> &ProvenancePolicy {
        &self.policy
    }

    pub fn execution(&self) -> &ExecutionOpts {
        self.scheduler.options()
    }

    /// Scatter kernels in use, in priority order (empty on the reference strategy).
    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.plan.as_ref().map(|p| p.kernel_names()).unwrap_or_default()
    }

    pub fn bits(&self) -> &BitField {
        &self.bits
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Bit `i` as stored. Panics if `i >= capacity`; not checked against `max_reached`.
    #[inline]
    pub fn is_reachable(&self, i: u64) -> bool {
        self.bits.get(i)
    }

    /// Bit `i`, for `1 <= i <= max_reached`.
    pub fn is_reachable_checked(&self, i: u64) -> Result<bool> {
        if i == 0 || i as i128 > self.max_reached as i128 {
            return Err(ClosureError::OutOfRange {
                index: i,
                lo: 1,
                hi: self.max_reached,
            });
        }
        Ok(self.bits.get(i))
    }

    /// Reachable indices in `[min, max]`.
    pub fn count_solutions(&self, min: u64, max: u64) -> Result<u64> {
        self.check_range(min, max)?;
        Ok(self.bits.count_ones_range(min, max))
    }

    /// Reachable indices over the whole capacity.
    pub fn count_all(&self) -> u64 {
        self.bits.count_ones()
    }

    /// `(index, reachable)` for every index in `[min, max]`, ascending.
    pub fn solutions(&self, min: u64, max: u64) -> Result<impl Iterator<Item = (u64, bool)> + '_> {
        self.check_range(min, max)?;
        Ok((min..=max).map(move |i| (i, self.bits.get(i))))
    }

    /// Call `f(index, reachable)` for every index in `[min, max]`, ascending.
    pub fn for_each_solution<F>(&self, min: u64, max: u64, mut f: F) -> Result<()>
    where
        F: FnMut(u64, bool),
    {
        for (i, reachable) in self.solutions(min, max)? {
            f(i, reachable);
        }
        Ok(())
    }

    /// Why `i` is reachable: `None` if it is not, otherwise the seed or the
    /// map credited under the provenance policy.
    pub fn witness(&self, i: u64) -> Result<Option<Witness>> {
        let ledger = self.ledger.as_ref().ok_or_else(|| {
            ClosureError::Configuration("provenance is not tracked for this run".to_string())
        })?;
        if i as i128 > self.max_reached as i128 {
            return Err(ClosureError::OutOfRange {
                index: i,
                lo: 0,
                hi: self.max_reached,
            });
        }
        if !self.bits.get(i) {
            return Ok(None);
        }
        Ok(Some(match ledger.tag(i) {
            0 => Witness::Seed,
            tag => Witness::Map(tag as usize - 1),
        }))
    }

    /// Regression fold over words `[0, limit / 64)`.
    pub fn checksum(&self, limit: u64) -> Result<u64> {
        probe::checksum(&self.bits, limit)
    }

    fn check_range(&self, min: u64, max: u64) -> Result<()> {
        if max < min {
            return Err(ClosureError::InvalidBounds { min, max });
        }
        if max as i128 > self.max_reached as i128 {
            return Err(ClosureError::OutOfRange {
                index: max,
                lo: 0,
                hi: self.max_reached,
            });
        }
        Ok(())
    }

    // ========================================================================
    // FILES
    // ========================================================================

    /// Write the unreachable indices in `[0, max_reached]`. Returns how many.
    pub fn write_unreachable<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        export::write_unreachable(&self.bits, self.max_reached, path)
    }

    /// Persist the full run state.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            maps: self.maps.clone(),
            seeds: self.seeds.clone(),
            capacity: self.capacity(),
            unit: self.unit,
            strategy: self.strategy,
            kernel: self.kernel,
            provenance: self.policy.clone(),
            max_reached: self.max_reached,
            words: self.bits.words().to_vec(),
            ledger: self.ledger.as_ref().map(|l| l.bytes().to_vec()),
            digest: [0; 32],
        }
        .seal();
        snapshot.save(path)
    }

    /// Rebuild a run from a snapshot. It can keep computing or grow.
    pub fn load_snapshot<P: AsRef<Path>>(path: P, execution: ExecutionOpts) -> Result<Self> {
        execution.validate()?;
        let snap = Snapshot::load(path)?;
        let priority = snap.provenance.priority(snap.maps.len())?;

        let expected_unit = match snap.strategy {
            Strategy::Vectorized => snap.maps.check_vectorizable()?,
            _ => snap.maps.unit().unwrap_or(SCALAR_UNIT),
        };
        if expected_unit != snap.unit {
            return Err(ClosureError::Configuration(format!(
                "snapshot: unit {} does not match map set unit {}",
                snap.unit, expected_unit
            )));
        }

        let plan = (snap.strategy == Strategy::Vectorized)
            .then(|| ClosurePlan::new(&snap.maps, snap.unit, snap.kernel, &priority));

        Ok(ClosureRun {
            seeds: snap.seeds,
            unit: snap.unit,
            strategy: snap.strategy,
            kernel: snap.kernel,
            priority,
            bits: BitField::from_words(snap.words),
            ledger: snap.ledger.map(ProvenanceLedger::from_bytes),
            max_reached: snap.max_reached,
            plan,
            scheduler: PartitionedScheduler::new(execution, snap.unit),
            maps: snap.maps,
            policy: snap.provenance,
        })
    }
}

/// Pick the evaluation strategy and its unit.
fn resolve_strategy(maps: &MapSet, requested: Strategy) -> Result<(Strategy, u64)> {
    match requested {
        Strategy::Vectorized => Ok((Strategy::Vectorized, maps.check_vectorizable()?)),
        Strategy::Reference => Ok((Strategy::Reference, maps.unit().unwrap_or(SCALAR_UNIT))),
        Strategy::Auto => match maps.check_vectorizable() {
            Ok(unit) => Ok((Strategy::Vectorized, unit)),
            Err(e) => {
                warn!(maps = %maps, reason = %e, "falling back to the reference strategy");
                Ok((Strategy::Reference, maps.unit().unwrap_or(SCALAR_UNIT)))
            }
        },
    }
}

/// Round `capacity` up to a positive multiple of `unit`.
fn round_capacity(capacity: u64, unit: u64) -> Result<u64> {
    if capacity == 0 {
        return Err(ClosureError::Configuration("capacity must be positive".to_string()));
    }
    capacity
        .div_ceil(unit)
        .checked_mul(unit)
        .ok_or_else(|| ClosureError::Configuration(format!("capacity {} overflows", capacity)))
}

/// Rate limiter for progress callbacks.
struct ProgressTicker {
    every: Duration,
    last: Instant,
    target: u64,
}

impl ProgressTicker {
    fn new(every_secs: u64, target: u64) -> Self {
        Self {
            every: Duration::from_secs(every_secs),
            last: Instant::now(),
            target,
        }
    }

    fn tick<F: FnMut(f64)>(&mut self, done_through: u64, progress: &mut F) {
        if self.last.elapsed() < self.every {
            return;
        }
        self.last = Instant::now();
        progress(((done_through + 1) as f64 / (self.target + 1) as f64).min(1.0));
    }
}
