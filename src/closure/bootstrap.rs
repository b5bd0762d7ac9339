//! Scalar fill of the first unit.
//!
//! The block engine needs a complete prefix `[0, UNIT)` to read behind. This
//! pass produces it with the scalar recurrence, honouring seeds already set
//! in the field.

use crate::bitfield::BitField;
use crate::maps::MapSet;
use crate::provenance::ProvenanceLedger;
use crate::reference::ScalarRecurrence;
use tracing::debug;

/// Resolve indices `[1, unit)`. Returns the number of newly reachable indices.
pub fn bootstrap(
    bits: &mut BitField,
    ledger: Option<&mut ProvenanceLedger>,
    maps: &MapSet,
    priority: &[usize],
    unit: u64,
) -> u64 {
    let end = unit.min(bits.capacity());
    if end < 2 {
        return 0;
    }
    let added = ScalarRecurrence::new(maps, priority).resolve_range(bits, ledger, 1, end - 1);
    debug!(unit, added, "bootstrap complete");
    added
}
