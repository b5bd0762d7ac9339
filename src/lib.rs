//! affine-closure - Vectorized Bitset Closure Engine
//!
//! Copyright (c) 2025 Affine Closure Contributors
//! Licensed under MIT License
//!
//! Computes which non-negative integers below a large bound are reachable
//! from a seed set under a fixed list of affine maps `x ↦ a·x + b`, one bit
//! per integer. Blocks of known bits are scattered through scale operators
//! (carry-less squaring for ×2, parallel bit deposit for ×3 and other
//! factors), shifted by each map's offset and OR-merged into the next block,
//! in doubling windows that can be split across worker threads.
//!
//! # Quick Start
//!
//! ```
//! use affine_closure::{ClosureRun, ComputeOpts, RunConfig};
//!
//! let mut run = ClosureRun::new(RunConfig::new(10_000, vec![1])).unwrap();
//! run.compute_till(&ComputeOpts::all()).unwrap();
//! println!("{} reachable", run.count_solutions(1, 9_999).unwrap());
//! ```

pub mod bitfield;
pub mod cli;
pub mod closure;
pub mod config;
pub mod error;
pub mod export;
pub mod maps;
pub mod popcount;
pub mod probe;
pub mod provenance;
pub mod reference;
pub mod run;
pub mod scale;
pub mod snapshot;

// Re-export main types for convenience
pub use bitfield::BitField;
pub use config::{ComputeOpts, ExecutionOpts, RunConfig, Strategy};
pub use error::{ClosureError, ErrorKind, Result};
pub use export::{read_unreachable, UNREACHABLE_MAGIC};
pub use maps::{AffineMap, MapSet};
pub use provenance::{ProvenancePolicy, Witness};
pub use run::ClosureRun;
pub use scale::{KernelChoice, ScaleBy};

/// Install the `tracing` subscriber used by the binary.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` when
/// `verbose`. Calling this twice is harmless.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
