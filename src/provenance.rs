//! Provenance ledger: which map first made each index reachable.
//!
//! One 4-bit tag per index, two indices per byte (even index in the low
//! nibble). Tag `0` means "no map witness" (unreachable, or a seed); tag
//! `k + 1` names map `k` of the map set. Each tag is written at most once.
//!
//! A word of 64 reachability bits corresponds to exactly
//! [`LEDGER_BYTES_PER_WORD`] ledger bytes, so the ledger can be split along
//! the same word boundaries as the bit field for parallel windows.

use crate::error::{ClosureError, Result};
use serde::{Deserialize, Serialize};

/// Ledger bytes covering one 64-bit word of the bit field.
pub const LEDGER_BYTES_PER_WORD: usize = 32;

/// How reachability of an index is explained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Witness {
    /// Marked reachable as part of the seed set.
    Seed,
    /// Established by the map at this position in the map set.
    Map(usize),
}

/// Which map gets credited when several reach the same index in one step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenancePolicy {
    /// No ledger is kept.
    #[default]
    Disabled,
    /// The first matching map in list order wins.
    ListOrder,
    /// The first matching map in the given order of map indices wins.
    Ranked(Vec<usize>),
}

impl ProvenancePolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ProvenancePolicy::Disabled)
    }

    /// Map indices in the order they are tried.
    pub fn priority(&self, map_count: usize) -> Result<Vec<usize>> {
        match self {
            ProvenancePolicy::Disabled | ProvenancePolicy::ListOrder => Ok((0..map_count).collect()),
            ProvenancePolicy::Ranked(order) => {
                let mut seen = vec![false; map_count];
                for &k in order {
                    if k >= map_count || seen[k] {
                        return Err(ClosureError::Configuration(format!(
                            "provenance ranking {:?} is not a permutation of 0..{}",
                            order, map_count
                        )));
                    }
                    seen[k] = true;
                }
                if order.len() != map_count {
                    return Err(ClosureError::Configuration(format!(
                        "provenance ranking {:?} is not a permutation of 0..{}",
                        order, map_count
                    )));
                }
                Ok(order.clone())
            }
        }
    }
}

/// Packed 4-bit tags for `[0, capacity)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvenanceLedger {
    tags: Vec<u8>,
}

impl ProvenanceLedger {
    /// Allocate a zeroed ledger. `capacity` must be a multiple of 64.
    pub fn try_new(capacity: u64) -> Result<Self> {
        Ok(Self { tags: zeroed_bytes(Self::byte_count(capacity))? })
    }

    pub fn from_bytes(tags: Vec<u8>) -> Self {
        Self { tags }
    }

    #[inline(always)]
    pub const fn byte_count(capacity: u64) -> usize {
        capacity.div_ceil(2) as usize
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.tags
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.tags
    }

    /// Raw tag of index `i`.
    #[inline]
    pub fn tag(&self, i: u64) -> u8 {
        read_tag(&self.tags, i as usize)
    }

    /// Record `map` for index `i` unless a tag is already present.
    #[inline]
    pub fn record(&mut self, i: u64, map: usize) {
        record_tag(&mut self.tags, i as usize, map);
    }

    pub fn clear(&mut self) {
        self.tags.fill(0);
    }

    /// Reserve room for `new_capacity` tags without changing the length.
    pub fn reserve(&mut self, new_capacity: u64) -> Result<()> {
        let extra = Self::byte_count(new_capacity).saturating_sub(self.tags.len());
        self.tags.try_reserve_exact(extra).map_err(|_| ClosureError::Allocation {
            what: "provenance ledger",
            bytes: extra as u64,
        })
    }

    pub fn grow(&mut self, new_capacity: u64) -> Result<()> {
        let want = Self::byte_count(new_capacity);
        if want <= self.tags.len() {
            return Ok(());
        }
        self.reserve(new_capacity)?;
        self.tags.resize(want, 0);
        Ok(())
    }
}

/// Tag of the `i`-th index of a ledger slice.
#[inline(always)]
pub(crate) fn read_tag(tags: &[u8], i: usize) -> u8 {
    (tags[i / 2] >> ((i % 2) * 4)) & 0x0f
}

/// First writer wins.
#[inline(always)]
pub(crate) fn record_tag(tags: &mut [u8], i: usize, map: usize) {
    debug_assert!(map < 15);
    let shift = (i % 2) * 4;
    let slot = &mut tags[i / 2];
    if (*slot >> shift) & 0x0f == 0 {
        *slot |= ((map as u8) + 1) << shift;
    }
}

fn zeroed_bytes(n: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(n).map_err(|_| ClosureError::Allocation {
        what: "provenance ledger",
        bytes: n as u64,
    })?;
    bytes.resize(n, 0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_first_writer_wins() {
        let mut ledger = ProvenanceLedger::try_new(128).unwrap();
        assert_eq!(ledger.bytes().len(), 64);

        ledger.record(10, 2);
        ledger.record(10, 0);
        ledger.record(11, 14);

        assert_eq!(ledger.tag(10), 3);
        assert_eq!(ledger.tag(11), 15);
        assert_eq!(ledger.tag(12), 0);
    }

    #[test]
    fn test_policy_priority() {
        assert_eq!(ProvenancePolicy::ListOrder.priority(3).unwrap(), vec![0, 1, 2]);
        assert_eq!(ProvenancePolicy::Ranked(vec![2, 0, 1]).priority(3).unwrap(), vec![2, 0, 1]);

        for bad in [vec![0, 1], vec![0, 0, 1], vec![0, 1, 3]] {
            let err = ProvenancePolicy::Ranked(bad).priority(3).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_grow() {
        let mut ledger = ProvenanceLedger::try_new(64).unwrap();
        ledger.record(63, 1);
        ledger.grow(256).unwrap();
        assert_eq!(ledger.bytes().len(), 128);
        assert_eq!(ledger.tag(63), 2);
        assert_eq!(ledger.tag(200), 0);
    }
}
