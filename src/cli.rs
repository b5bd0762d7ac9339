//! CLI interface for affine-closure
//!
//! Provides command-line interface for:
//! - Computing a closure and exporting its results
//! - Inspecting a saved snapshot
//! - Verifying the vectorized engine against the scalar reference

use crate::config::{ComputeOpts, ExecutionOpts, RunConfig, Strategy};
use crate::error::Result;
use crate::maps::{AffineMap, MapSet};
use crate::provenance::{ProvenancePolicy, Witness};
use crate::run::ClosureRun;
use crate::scale::{simd_features_string, KernelChoice};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "affine-closure")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Vectorized bitset closure of integers under affine maps")]
#[command(
    long_about = "affine-closure - which integers are reachable from a seed set under x -> a*x + b\n\n\
    Reachability is stored as one bit per integer and computed block by block with\n\
    carry-less squaring (x2) and parallel bit deposit (x3 and other factors), in\n\
    doubling windows that can be split across worker threads.\n\n\
    Examples:\n\
      affine-closure compute --capacity 100000 --seed 1 --checksum 100000\n\
      affine-closure compute -c 1000000000 --seed 1 --threads 8 --snapshot run.snap\n\
      affine-closure inspect run.snap --index 3 --index 4 --count 1..1000\n\
      affine-closure verify --capacity 2000000 --seed 1 --threads 4"
)]
#[command(author = "Affine Closure Contributors")]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `compute` and `verify`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON run configuration; command-line flags override its fields
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of indices to allocate (rounded up to the unit)
    #[arg(short, long, value_name = "N")]
    pub capacity: Option<u64>,

    /// Map as `a,b` for x -> a*x + b; repeat for several (default 2,1 3,0 3,2 3,7)
    #[arg(short, long = "map", value_name = "A,B")]
    pub maps: Vec<AffineMap>,

    /// Seed index; repeat for several. No seed is assumed.
    #[arg(short, long = "seed", value_name = "INDEX")]
    pub seeds: Vec<u64>,

    /// Use only the portable per-bit scatter kernels
    #[arg(long)]
    pub portable: bool,

    /// Split large windows across this many worker threads
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Minimum window size, in indices, for splitting across threads
    #[arg(long, value_name = "N")]
    pub parallel_threshold: Option<u64>,
}

impl RunArgs {
    fn to_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if !self.maps.is_empty() {
            config.maps = MapSet::new(self.maps.clone())?;
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds.clone();
        }
        if self.portable {
            config.kernel = KernelChoice::Portable;
        }
        config.execution = self.execution(config.execution);
        Ok(config)
    }

    fn execution(&self, mut opts: ExecutionOpts) -> ExecutionOpts {
        if let Some(threads) = self.threads {
            opts.use_threads = threads > 1;
            opts.num_threads = threads;
        }
        if let Some(threshold) = self.parallel_threshold {
            opts.parallel_threshold = threshold;
        }
        opts
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute a closure and report or export the result
    #[command(
        long_about = "Compute the reachable set and report or export the result\n\n\
        The run is configured from an optional JSON file plus command-line flags.\n\
        After computing, the reachable count is printed and, on request, the\n\
        regression checksum, the unreachable-index file and a snapshot are written.\n\n\
        Example:\n\
          affine-closure compute --capacity 100000 --seed 1 --checksum 100000\n\
          affine-closure compute --config run.json --unreachable missing.bin"
    )]
    Compute {
        #[command(flatten)]
        run: RunArgs,

        /// Largest index to compute (default: the whole capacity)
        #[arg(long, value_name = "INDEX")]
        max: Option<u64>,

        /// Evaluation strategy
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        /// Track which map first reached every index (list order wins ties)
        #[arg(long)]
        provenance: bool,

        /// Print the checksum over the first LIMIT indices
        #[arg(long, value_name = "LIMIT")]
        checksum: Option<u64>,

        /// Write unreachable indices to FILE
        #[arg(long, value_name = "FILE")]
        unreachable: Option<PathBuf>,

        /// Save a snapshot of the run to FILE
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },

    /// Query a saved snapshot, optionally extending it first
    #[command(
        long_about = "Load a snapshot and answer queries against it\n\n\
        Ranges are inclusive and written MIN..MAX. With --extend the run is grown\n\
        and computed further before queries, and --save writes the result back.\n\n\
        Example:\n\
          affine-closure inspect run.snap --index 3 --count 1..99999\n\
          affine-closure inspect run.snap --extend 2000000000 --save bigger.snap"
    )]
    Inspect {
        /// Snapshot file
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,

        /// Print reachability (and witness, if tracked) of INDEX
        #[arg(short, long = "index", value_name = "INDEX")]
        indices: Vec<u64>,

        /// Count reachable indices in MIN..MAX
        #[arg(long, value_name = "MIN..MAX", value_parser = parse_range)]
        count: Vec<(u64, u64)>,

        /// Print the checksum over the first LIMIT indices
        #[arg(long, value_name = "LIMIT")]
        checksum: Option<u64>,

        /// Grow to this capacity and compute before answering
        #[arg(long, value_name = "N")]
        extend: Option<u64>,

        /// Worker threads for --extend
        #[arg(short, long, value_name = "N")]
        threads: Option<usize>,

        /// Write unreachable indices to FILE
        #[arg(long, value_name = "FILE")]
        unreachable: Option<PathBuf>,

        /// Save the (possibly extended) run to FILE
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },

    /// Check the vectorized engine against the scalar reference
    #[command(
        long_about = "Run the same configuration with both strategies and compare every bit\n\n\
        Exits with status 1 on the first mismatch. Use a capacity above the\n\
        parallel threshold together with --threads to cover the partitioned path.\n\n\
        Example:\n\
          affine-closure verify --capacity 2000000 --seed 1 --threads 4 --parallel-threshold 100000"
    )]
    Verify {
        #[command(flatten)]
        run: RunArgs,
    },
}

fn parse_range(s: &str) -> std::result::Result<(u64, u64), String> {
    let (lo, hi) = s
        .split_once("..")
        .ok_or_else(|| format!("range '{}' must be written MIN..MAX", s))?;
    let lo = lo.trim().parse::<u64>().map_err(|e| format!("{}: {}", lo, e))?;
    let hi = hi.trim().parse::<u64>().map_err(|e| format!("{}: {}", hi, e))?;
    Ok((lo, hi))
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    crate::init_tracing(cli.verbose);
    execute(cli.command)
}

/// Execute a parsed command.
pub fn execute(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Compute {
            run,
            max,
            strategy,
            provenance,
            checksum,
            unreachable,
            snapshot,
        } => {
            let mut config = run.to_config()?;
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if provenance {
                config.provenance = ProvenancePolicy::ListOrder;
            }
            let execution = config.execution.clone();

            let mut closure = ClosureRun::new(config)?;
            info!(features = %simd_features_string(), kernels = ?closure.kernel_names(), "starting");
            let opts = ComputeOpts { max, execution };
            closure.compute_till_with_progress(&opts, |f| info!("{:.1}% complete", f * 100.0))?;

            print_summary(&closure);
            if let Some(limit) = checksum {
                println!("checksum({}) = {}", limit, closure.checksum(limit)?);
            }
            if let Some(path) = unreachable {
                let n = closure.write_unreachable(&path)?;
                println!("unreachable: {} indices -> {}", n, path.display());
            }
            if let Some(path) = snapshot {
                closure.save_snapshot(&path)?;
                println!("snapshot: {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Inspect {
            snapshot,
            indices,
            count,
            checksum,
            extend,
            threads,
            unreachable,
            save,
        } => {
            let execution = match threads {
                Some(n) => ExecutionOpts::threaded(n),
                None => ExecutionOpts::default(),
            };
            let mut closure = ClosureRun::load_snapshot(&snapshot, execution.clone())?;

            if let Some(capacity) = extend {
                closure.grow(capacity)?;
                closure.compute_till(&ComputeOpts::all().with_execution(execution))?;
            }

            print_summary(&closure);
            let tracked = closure.provenance_policy().is_enabled();
            for i in indices {
                let reachable = closure.is_reachable_checked(i)?;
                if tracked {
                    let how = match closure.witness(i)? {
                        None => "-".to_string(),
                        Some(Witness::Seed) => "seed".to_string(),
                        Some(Witness::Map(k)) => format!("{}", closure.maps().maps()[k]),
                    };
                    println!("{}: {} ({})", i, reachable, how);
                } else {
                    println!("{}: {}", i, reachable);
                }
            }
            for (lo, hi) in count {
                println!("count({}..{}) = {}", lo, hi, closure.count_solutions(lo, hi)?);
            }
            if let Some(limit) = checksum {
                println!("checksum({}) = {}", limit, closure.checksum(limit)?);
            }
            if let Some(path) = unreachable {
                let n = closure.write_unreachable(&path)?;
                println!("unreachable: {} indices -> {}", n, path.display());
            }
            if let Some(path) = save {
                closure.save_snapshot(&path)?;
                println!("snapshot: {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Verify { run } => {
            let config = run.to_config()?;
            let execution = config.execution.clone();

            let mut fast = ClosureRun::new(config.clone().with_strategy(Strategy::Vectorized))?;
            let mut slow_config = config.with_strategy(Strategy::Reference);
            slow_config.capacity = fast.capacity();
            let mut slow = ClosureRun::new(slow_config)?;
            let opts = ComputeOpts::all().with_execution(execution);
            fast.compute_till(&opts)?;
            slow.compute_till(&opts)?;

            let mismatch = fast
                .bits()
                .words()
                .iter()
                .zip(slow.bits().words())
                .position(|(a, b)| a != b);
            match mismatch {
                None => {
                    println!(
                        "OK: {} indices agree, {} reachable",
                        fast.capacity(),
                        fast.count_all()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Some(w) => {
                    let diff = fast.bits().words()[w] ^ slow.bits().words()[w];
                    let index = w as u64 * 64 + diff.trailing_zeros() as u64;
                    println!(
                        "MISMATCH at index {}: vectorized={}, reference={}",
                        index,
                        fast.is_reachable(index),
                        slow.is_reachable(index)
                    );
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn print_summary(closure: &ClosureRun) {
    println!("maps: {}", closure.maps());
    println!("seeds: {:?}", closure.seeds());
    println!(
        "capacity: {} (unit {}, {} strategy)",
        closure.capacity(),
        closure.unit(),
        closure.strategy()
    );
    println!("max reached: {}", closure.max_reached());
    if closure.max_reached() >= 0 {
        let reachable = closure.count_solutions(0, closure.max_reached() as u64).unwrap_or(0);
        println!("reachable: {}", reachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("1..100").unwrap(), (1, 100));
        assert!(parse_range("1-100").is_err());
        assert!(parse_range("a..3").is_err());
    }

    #[test]
    fn test_cli_parses_maps_and_seeds() {
        let cli = Cli::try_parse_from([
            "affine-closure",
            "compute",
            "--capacity",
            "4096",
            "--map",
            "2,1",
            "--map",
            "3,7",
            "--seed",
            "1",
            "--threads",
            "4",
        ])
        .unwrap();
        let Commands::Compute { run, .. } = cli.command else {
            panic!("expected compute");
        };
        let config = run.to_config().unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.maps, MapSet::from_pairs(&[(2, 1), (3, 7)]).unwrap());
        assert_eq!(config.seeds, vec![1]);
        assert!(config.execution.use_threads);
        assert_eq!(config.execution.num_threads, 4);
    }

    #[test]
    fn test_cli_rejects_bad_map() {
        assert!(Cli::try_parse_from(["affine-closure", "compute", "--map", "1,0"]).is_err());
    }

    #[test]
    fn test_verify_small() {
        let cli = Cli::try_parse_from([
            "affine-closure",
            "verify",
            "--capacity",
            "20000",
            "--seed",
            "1",
        ])
        .unwrap();
        assert_eq!(execute(cli.command).unwrap(), ExitCode::SUCCESS);
    }
}
