//! Integration tests for closure runs: equivalence, golden values, boundaries

use affine_closure::{
    ClosureRun, ComputeOpts, ErrorKind, ExecutionOpts, KernelChoice, MapSet, ProvenancePolicy,
    RunConfig, Strategy, Witness,
};

fn computed(config: RunConfig) -> ClosureRun {
    let execution = config.execution.clone();
    let mut run = ClosureRun::new(config).unwrap();
    run.compute_till(&ComputeOpts::all().with_execution(execution)).unwrap();
    run
}

fn assert_same_bits(fast: &ClosureRun, slow: &ClosureRun) {
    assert_eq!(fast.capacity(), slow.capacity());
    if let Some(w) = fast
        .bits()
        .words()
        .iter()
        .zip(slow.bits().words())
        .position(|(a, b)| a != b)
    {
        panic!("first differing word {} (indices {}..{})", w, w * 64, w * 64 + 64);
    }
}

/// Small parallel threshold so that most windows are split.
fn threaded() -> ExecutionOpts {
    ExecutionOpts {
        use_threads: true,
        num_threads: 4,
        parallel_threshold: 1536 * 8,
        callback_frequency_secs: 1,
    }
}

#[test]
fn test_golden_checksum() {
    let run = computed(RunConfig::new(100_000, vec![1]));
    assert_eq!(run.checksum(100_000).unwrap(), 15063046391347018756);
    assert_eq!(run.count_solutions(0, 99_999).unwrap(), 96_170);
}

#[test]
fn test_golden_checksum_every_path() {
    for (strategy, kernel, execution) in [
        (Strategy::Reference, KernelChoice::Auto, ExecutionOpts::default()),
        (Strategy::Vectorized, KernelChoice::Portable, ExecutionOpts::default()),
        (Strategy::Vectorized, KernelChoice::Auto, threaded()),
    ] {
        let run = computed(
            RunConfig::new(200_000, vec![1])
                .with_strategy(strategy)
                .with_kernel(kernel)
                .with_execution(execution),
        );
        assert_eq!(run.checksum(100_000).unwrap(), 15063046391347018756, "{:?}/{:?}", strategy, kernel);
    }
}

#[test]
fn test_vectorized_matches_reference_threaded() {
    let capacity = 1536 * 64;
    let base = RunConfig::new(capacity, vec![1]).with_execution(threaded());

    let fast = computed(base.clone().with_strategy(Strategy::Vectorized));
    let slow = computed(base.with_strategy(Strategy::Reference));
    assert_same_bits(&fast, &slow);
    assert_eq!(fast.max_reached(), capacity as i64 - 1);
}

#[test]
fn test_vectorized_matches_reference_other_map_sets() {
    let cases: Vec<(Vec<(i64, i64)>, Vec<u64>)> = vec![
        (vec![(2, 0), (3, -3), (5, 11)], vec![3]),
        (vec![(3, -2), (4, 100)], vec![2, 9]),
        (vec![(2, 1), (7, 3)], vec![1]),
        (vec![(3, 1)], vec![1, 2]),
        (vec![(2, 5), (3, 512), (256, -256)], vec![1, 4, 17]),
    ];
    for (pairs, seeds) in cases {
        let maps = MapSet::from_pairs(&pairs).unwrap();
        let unit = maps.check_vectorizable().unwrap();
        let config = RunConfig::new(unit * 12, seeds)
            .with_maps(maps.clone())
            .with_execution(ExecutionOpts {
                parallel_threshold: unit * 2,
                ..threaded()
            });

        let fast = computed(config.clone().with_strategy(Strategy::Vectorized));
        let slow = computed(config.with_strategy(Strategy::Reference));
        assert_same_bits(&fast, &slow);
        assert!(fast.count_all() > 0, "{}", maps);
    }
}

#[test]
fn test_seeds_above_unit_propagate() {
    let config = RunConfig::new(1536 * 16, vec![1, 5000, 7777]);
    let fast = computed(config.clone());
    let slow = computed(config.with_strategy(Strategy::Reference));
    assert_same_bits(&fast, &slow);
    assert!(fast.is_reachable(5000));
    assert!(fast.is_reachable(3 * 5000 + 7));
}

#[test]
fn test_no_seeds_reaches_nothing() {
    let run = computed(RunConfig::new(10_000, vec![]));
    assert_eq!(run.count_all(), 0);
}

#[test]
fn test_index_zero_only_if_seeded() {
    let run = computed(RunConfig::new(5_000, vec![1]));
    assert!(!run.is_reachable(0));

    // 0 is a seed; 3x maps it to itself, 2x+1 and 3x+2 take it further
    let run = computed(RunConfig::new(5_000, vec![0]));
    assert!(run.is_reachable(0));
    assert!(run.is_reachable(1));
    assert!(run.is_reachable(2));
}

#[test]
fn test_auto_uses_reference_for_negative_doubling() {
    let maps = MapSet::from_pairs(&[(2, -1), (3, 0)]).unwrap();
    let run = computed(RunConfig::new(4_000, vec![2]).with_maps(maps));
    assert_eq!(run.strategy(), Strategy::Reference);
    // 2 -> 3 (2x-1), 6 (3x); 3 -> 5, 9
    for i in [2, 3, 5, 6, 9] {
        assert!(run.is_reachable_checked(i).unwrap(), "{}", i);
    }
    assert!(!run.is_reachable_checked(4).unwrap());
}

#[test]
fn test_boundaries() {
    let mut run = ClosureRun::new(RunConfig::new(1536 * 4, vec![1])).unwrap();
    assert_eq!(run.is_reachable_checked(1).unwrap_err().kind(), ErrorKind::OutOfRange);

    run.compute_till(&ComputeOpts::till(2000)).unwrap();
    let max = run.max_reached() as u64;
    assert_eq!(max, 3071);

    assert_eq!(run.is_reachable_checked(0).unwrap_err().kind(), ErrorKind::OutOfRange);
    assert_eq!(run.is_reachable_checked(max + 1).unwrap_err().kind(), ErrorKind::OutOfRange);
    assert!(run.is_reachable_checked(max).is_ok());

    assert_eq!(run.count_solutions(1, max + 1).unwrap_err().kind(), ErrorKind::OutOfRange);
    assert_eq!(run.count_solutions(10, 5).unwrap_err().kind(), ErrorKind::Configuration);
    assert!(run.solutions(0, max + 1).is_err());

    assert_eq!(run.checksum(run.capacity()).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(
        run.compute_till(&ComputeOpts::till(run.capacity())).unwrap_err().kind(),
        ErrorKind::Configuration
    );
}

#[test]
fn test_solution_iteration_agrees_with_count() {
    let run = computed(RunConfig::new(20_000, vec![1]));
    let (lo, hi) = (777, 15_000);

    let mut visited = Vec::new();
    run.for_each_solution(lo, hi, |i, reachable| visited.push((i, reachable)))
        .unwrap();
    assert_eq!(visited.len() as u64, hi - lo + 1);
    assert!(visited.windows(2).all(|w| w[0].0 + 1 == w[1].0));
    assert!(visited.iter().all(|&(i, r)| run.is_reachable(i) == r));

    let via_iter = run.solutions(lo, hi).unwrap().filter(|&(_, r)| r).count() as u64;
    assert_eq!(via_iter, run.count_solutions(lo, hi).unwrap());
}

#[test]
fn test_grow_is_monotone() {
    let mut run = computed(RunConfig::new(1536 * 8, vec![1]));
    let before = run.bits().words().to_vec();

    run.grow(1536 * 40).unwrap();
    assert_eq!(run.capacity(), 1536 * 40);
    assert_eq!(run.max_reached(), 1536 * 8 - 1);
    run.compute_till(&ComputeOpts::all()).unwrap();

    let after = run.bits().words();
    assert!(before.iter().zip(after).all(|(b, a)| b & a == *b));

    let fresh = computed(RunConfig::new(1536 * 40, vec![1]));
    assert_same_bits(&run, &fresh);
}

#[test]
fn test_recompute_is_noop() {
    let mut run = computed(RunConfig::new(1536 * 8, vec![1]));
    let before = run.bits().words().to_vec();
    run.compute_till(&ComputeOpts::all()).unwrap();
    run.compute_till(&ComputeOpts::till(100)).unwrap();
    assert_eq!(run.bits().words(), &before[..]);
}

#[test]
fn test_provenance_agrees_across_strategies_and_threads() {
    let capacity = 1536 * 32;
    for policy in [ProvenancePolicy::ListOrder, ProvenancePolicy::Ranked(vec![3, 1, 2, 0])] {
        let base = RunConfig::new(capacity, vec![1, 5]).with_provenance(policy.clone());
        let slow = computed(base.clone().with_strategy(Strategy::Reference));
        let fast = computed(base.clone().with_execution(threaded()));
        let inline = computed(base);
        assert_same_bits(&fast, &slow);

        for i in 0..capacity {
            let w = slow.witness(i).unwrap();
            assert_eq!(fast.witness(i).unwrap(), w, "index {} under {:?}", i, policy);
            assert_eq!(inline.witness(i).unwrap(), w);
        }
        assert_eq!(fast.witness(5).unwrap(), Some(Witness::Seed));
    }
}

#[test]
fn test_witness_is_a_real_predecessor() {
    let run = computed(
        RunConfig::new(1536 * 8, vec![1]).with_provenance(ProvenancePolicy::ListOrder),
    );
    for i in 2..run.capacity() {
        if let Some(Witness::Map(k)) = run.witness(i).unwrap() {
            let map = run.maps().maps()[k];
            let x = map.preimage(i).unwrap();
            assert!(run.is_reachable(x), "{} via {} from {}", i, map, x);
        }
    }
}
