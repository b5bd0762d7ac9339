//! Run configuration.
//!
//! Everything is plain serde data with defaults for every field, so a JSON
//! file only needs to name what differs:
//!
//! ```json
//! {
//!   "capacity": 100000000,
//!   "maps": [{"a": 2, "b": 1}, {"a": 3, "b": 0}],
//!   "seeds": [1],
//!   "execution": {"use_threads": true, "num_threads": 8}
//! }
//! ```

use crate::error::{ClosureError, Result};
use crate::maps::MapSet;
use crate::provenance::ProvenancePolicy;
use crate::scale::KernelChoice;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Default number of indices allocated for a run.
pub const DEFAULT_CAPACITY: u64 = 1_000_000_000;
/// Default window size (in indices) from which windows are split across workers.
pub const DEFAULT_PARALLEL_THRESHOLD: u64 = 400_000_000;
/// Default worker count.
pub const DEFAULT_NUM_THREADS: usize = 4;

/// How the closure is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Vectorized when the map set allows it, reference otherwise.
    #[default]
    Auto,
    /// Block engine only; unsupported map sets are a configuration error.
    Vectorized,
    /// Scalar recurrence only.
    Reference,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Auto => write!(f, "auto"),
            Strategy::Vectorized => write!(f, "vectorized"),
            Strategy::Reference => write!(f, "reference"),
        }
    }
}

/// Threading and progress hints. All advisory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOpts {
    /// Split large windows across a worker pool.
    pub use_threads: bool,
    /// Workers in the pool.
    pub num_threads: usize,
    /// Minimum window size, in indices, for splitting.
    pub parallel_threshold: u64,
    /// Minimum seconds between progress callbacks.
    pub callback_frequency_secs: u64,
}

impl Default for ExecutionOpts {
    fn default() -> Self {
        ExecutionOpts {
            use_threads: false,
            num_threads: DEFAULT_NUM_THREADS,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            callback_frequency_secs: 1,
        }
    }
}

impl ExecutionOpts {
    /// Threaded execution with `num_threads` workers.
    pub fn threaded(num_threads: usize) -> Self {
        ExecutionOpts {
            use_threads: true,
            num_threads,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.use_threads && self.num_threads == 0 {
            return Err(ClosureError::Configuration(
                "num_threads must be at least 1 when threads are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to create a [`ClosureRun`](crate::ClosureRun).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Requested capacity; rounded up to a multiple of the unit.
    pub capacity: u64,
    pub maps: MapSet,
    /// Initial reachable indices. Nothing is seeded implicitly.
    pub seeds: Vec<u64>,
    pub strategy: Strategy,
    pub kernel: KernelChoice,
    pub provenance: ProvenancePolicy,
    pub execution: ExecutionOpts,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            capacity: DEFAULT_CAPACITY,
            maps: MapSet::reference(),
            seeds: Vec::new(),
            strategy: Strategy::Auto,
            kernel: KernelChoice::Auto,
            provenance: ProvenancePolicy::Disabled,
            execution: ExecutionOpts::default(),
        }
    }
}

impl RunConfig {
    /// Default configuration over `capacity` indices with the given seeds.
    pub fn new(capacity: u64, seeds: Vec<u64>) -> Self {
        RunConfig {
            capacity,
            seeds,
            ..Self::default()
        }
    }

    pub fn with_maps(mut self, maps: MapSet) -> Self {
        self.maps = maps;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelChoice) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_provenance(mut self, provenance: ProvenancePolicy) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionOpts) -> Self {
        self.execution = execution;
        self
    }

    /// Load a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ClosureError::Configuration(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(config)
    }
}

/// Options for a single `compute_till` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComputeOpts {
    /// Largest index to complete; `None` means the whole capacity.
    pub max: Option<u64>,
    pub execution: ExecutionOpts,
}

impl ComputeOpts {
    pub fn till(max: u64) -> Self {
        ComputeOpts {
            max: Some(max),
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_execution(mut self, execution: ExecutionOpts) -> Self {
        self.execution = execution;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::AffineMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.capacity, 1_000_000_000);
        assert_eq!(config.maps, MapSet::reference());
        assert!(config.seeds.is_empty());
        assert!(!config.execution.use_threads);
        assert_eq!(config.execution.num_threads, 4);
        assert_eq!(config.execution.parallel_threshold, 400_000_000);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "capacity": 4096,
            "maps": [{"a": 2, "b": 0}, {"a": 3, "b": -3}],
            "seeds": [3],
            "strategy": "reference",
            "provenance": {"ranked": [1, 0]},
            "execution": {"use_threads": true}
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.maps.maps()[1], AffineMap { a: 3, b: -3 });
        assert_eq!(config.strategy, Strategy::Reference);
        assert_eq!(config.provenance, ProvenancePolicy::Ranked(vec![1, 0]));
        assert!(config.execution.use_threads);
        assert_eq!(config.execution.num_threads, 4);
        assert_eq!(config.kernel, KernelChoice::Auto);
    }

    #[test]
    fn test_invalid_maps_rejected_on_load() {
        let json = r#"{"maps": [{"a": 1, "b": 0}]}"#;
        assert!(serde_json::from_str::<RunConfig>(json).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"capacity": 100000, "seeds": [1], "kernel": "portable"}}"#).unwrap();

        let config = RunConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.capacity, 100_000);
        assert_eq!(config.seeds, vec![1]);
        assert_eq!(config.kernel, KernelChoice::Portable);

        assert!(RunConfig::from_json_file("/nonexistent/run.json").is_err());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let opts = ExecutionOpts::threaded(0);
        assert!(opts.validate().is_err());
        assert!(ExecutionOpts::default().validate().is_ok());
    }
}
