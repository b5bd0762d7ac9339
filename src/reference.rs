//! Scalar reference recurrence, one index at a time.
//!
//! For each index `i` in increasing order, maps are tried in priority order;
//! `i` becomes reachable as soon as one map has a reachable preimage
//! `(i - b) / a`. This is the baseline the vectorized engine is checked
//! against, the bootstrap for the first unit, and the execution strategy for
//! map sets the engine cannot schedule.

use crate::bitfield::BitField;
use crate::maps::MapSet;
use crate::provenance::ProvenanceLedger;

/// Scalar evaluator over a map set with a fixed priority order.
#[derive(Clone, Copy, Debug)]
pub struct ScalarRecurrence<'a> {
    maps: &'a MapSet,
    priority: &'a [usize],
}

impl<'a> ScalarRecurrence<'a> {
    pub fn new(maps: &'a MapSet, priority: &'a [usize]) -> Self {
        debug_assert_eq!(maps.len(), priority.len());
        Self { maps, priority }
    }

    /// First map (in priority order) that reaches `i` from a set bit.
    #[inline]
    pub fn witness_for(&self, bits: &BitField, i: u64) -> Option<usize> {
        self.priority.iter().copied().find(|&k| {
            self.maps.maps()[k]
                .preimage(i)
                .is_some_and(|x| x < bits.capacity() && bits.get(x))
        })
    }

    /// Resolve `[from, to]` in increasing order. Already-set indices (seeds)
    /// keep their state and receive no tag. Returns the number of newly set bits.
    pub fn resolve_range(
        &self,
        bits: &mut BitField,
        mut ledger: Option<&mut ProvenanceLedger>,
        from: u64,
        to: u64,
    ) -> u64 {
        let mut newly_set = 0;
        for i in from.max(1)..=to {
            if bits.get(i) {
                continue;
            }
            if let Some(k) = self.witness_for(bits, i) {
                bits.set(i);
                newly_set += 1;
                if let Some(ledger) = ledger.as_deref_mut() {
                    ledger.record(i, k);
                }
            }
        }
        newly_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_reference_prefix() {
        let maps = MapSet::reference();
        let priority = [0, 1, 2, 3];
        let mut bits = BitField::try_new(64).unwrap();
        bits.set(1);

        ScalarRecurrence::new(&maps, &priority).resolve_range(&mut bits, None, 1, 63);

        // 1 -> 3 (2x+1, 3x), 5 (3x+2), 10 (3x+7); 3 -> 7, 9, 11, 16; ...
        for i in [1, 3, 5, 7, 9, 10, 11, 15, 16] {
            assert!(bits.get(i), "{} should be reachable", i);
        }
        for i in [0, 2, 4, 6, 8, 12] {
            assert!(!bits.get(i), "{} should be unreachable", i);
        }
    }

    #[test]
    fn test_witness_respects_priority() {
        let maps = MapSet::reference();
        let mut bits = BitField::try_new(64).unwrap();
        bits.set(1);

        // 3 = 2*1 + 1 = 3*1 + 0
        let forward = [0, 1, 2, 3];
        let backward = [3, 2, 1, 0];
        assert_eq!(ScalarRecurrence::new(&maps, &forward).witness_for(&bits, 3), Some(0));
        assert_eq!(ScalarRecurrence::new(&maps, &backward).witness_for(&bits, 3), Some(1));
    }

    #[test]
    fn test_seeds_get_no_tag() {
        let maps = MapSet::reference();
        let priority = [0, 1, 2, 3];
        let mut bits = BitField::try_new(64).unwrap();
        let mut ledger = ProvenanceLedger::try_new(64).unwrap();
        bits.set(1);
        bits.set(3);

        ScalarRecurrence::new(&maps, &priority).resolve_range(&mut bits, Some(&mut ledger), 1, 63);
        assert_eq!(ledger.tag(1), 0);
        assert_eq!(ledger.tag(3), 0);
        // 5 = 3*1 + 2
        assert_eq!(ledger.tag(5), 3);
    }
}
