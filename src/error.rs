//! Error types for closure runs.
//!
//! Every fallible operation in the crate returns [`ClosureError`]. Errors fall
//! into four broad kinds (see [`ErrorKind`]): configuration mistakes and range
//! violations are detected eagerly at call boundaries, resource exhaustion
//! aborts the whole run, and I/O failures are reported once without retry.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = ClosureError> = std::result::Result<T, E>;

/// Coarse classification of a [`ClosureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid maps, alignment, limits or call order.
    Configuration,
    /// Index or range outside the computed/allocated region.
    OutOfRange,
    /// Allocation or worker pool failure.
    Resource,
    /// File open/read/write failure.
    Io,
}

/// Errors produced while configuring, computing or querying a closure run.
#[derive(Debug)]
pub enum ClosureError {
    /// An affine map violates `1 < a <= 256`, `b >= -a`, `b <= 512`.
    InvalidMap {
        a: i64,
        b: i64,
        reason: &'static str,
    },
    /// The map set itself is unusable (empty, too many maps, ...).
    InvalidMapSet(String),
    /// The map set cannot be evaluated by the vectorized engine.
    Unvectorizable(String),
    /// A range boundary is not a multiple of the processing unit.
    Unaligned { value: u64, unit: u64 },
    /// `max < min` in a range query.
    InvalidBounds { min: u64, max: u64 },
    /// Checksum limit must be strictly below the capacity.
    ChecksumLimit { limit: u64, capacity: u64 },
    /// Computation target beyond the allocated capacity.
    TargetExceedsCapacity { target: u64, capacity: u64 },
    /// Any other invalid configuration or call order.
    Configuration(String),
    /// Query index outside `[lo, hi]`.
    OutOfRange { index: u64, lo: u64, hi: i64 },
    /// Seed outside `[0, capacity)`.
    SeedOutOfRange { seed: u64, capacity: u64 },
    /// Allocation of the named buffer failed.
    Allocation { what: &'static str, bytes: u64 },
    /// The worker pool could not be built.
    WorkerPool(String),
    /// Underlying I/O failure.
    Io(io::Error),
}

impl ClosureError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClosureError::InvalidMap { .. }
            | ClosureError::InvalidMapSet(_)
            | ClosureError::Unvectorizable(_)
            | ClosureError::Unaligned { .. }
            | ClosureError::InvalidBounds { .. }
            | ClosureError::ChecksumLimit { .. }
            | ClosureError::TargetExceedsCapacity { .. }
            | ClosureError::Configuration(_) => ErrorKind::Configuration,
            ClosureError::OutOfRange { .. } | ClosureError::SeedOutOfRange { .. } => {
                ErrorKind::OutOfRange
            }
            ClosureError::Allocation { .. } | ClosureError::WorkerPool(_) => ErrorKind::Resource,
            ClosureError::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for ClosureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosureError::InvalidMap { a, b, reason } => {
                write!(f, "Invalid affine map {}x{:+}: {}", a, b, reason)
            }
            ClosureError::InvalidMapSet(msg) => write!(f, "Invalid map set: {}", msg),
            ClosureError::Unvectorizable(msg) => {
                write!(f, "Map set not supported by the vectorized engine: {}", msg)
            }
            ClosureError::Unaligned { value, unit } => {
                write!(f, "Boundary {} is not a multiple of the unit {}", value, unit)
            }
            ClosureError::InvalidBounds { min, max } => {
                write!(f, "Invalid bounds min={}, max={}", min, max)
            }
            ClosureError::ChecksumLimit { limit, capacity } => {
                write!(f, "Checksum limit {} too high (capacity {})", limit, capacity)
            }
            ClosureError::TargetExceedsCapacity { target, capacity } => {
                write!(f, "Max entry exceeded (max={}, capacity={})", target, capacity)
            }
            ClosureError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            ClosureError::OutOfRange { index, lo, hi } => {
                write!(f, "Attempted to access value {} out of bounds [{}..{}]", index, lo, hi)
            }
            ClosureError::SeedOutOfRange { seed, capacity } => {
                write!(f, "Invalid initial value {}; must be in range [0..{}]", seed, capacity - 1)
            }
            ClosureError::Allocation { what, bytes } => {
                write!(f, "Failed to allocate {} bytes for {}", bytes, what)
            }
            ClosureError::WorkerPool(msg) => write!(f, "Failed to build worker pool: {}", msg),
            ClosureError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ClosureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClosureError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClosureError {
    fn from(e: io::Error) -> Self {
        ClosureError::Io(e)
    }
}
