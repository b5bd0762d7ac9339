//! Snapshot persistence for closure runs.
//!
//! A snapshot is the whole state of a run, bincode-encoded, with a SHA-256
//! digest over the maps, seeds, progress, words and ledger. A damaged file is
//! rejected on load instead of silently producing wrong answers.

use crate::config::Strategy;
use crate::error::{ClosureError, Result};
use crate::maps::MapSet;
use crate::provenance::{ProvenanceLedger, ProvenancePolicy};
use crate::scale::KernelChoice;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Serialized state of a [`ClosureRun`](crate::ClosureRun).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u32,
    pub maps: MapSet,
    pub seeds: Vec<u64>,
    pub capacity: u64,
    pub unit: u64,
    /// Resolved strategy (never `Auto`).
    pub strategy: Strategy,
    pub kernel: KernelChoice,
    pub provenance: ProvenancePolicy,
    pub max_reached: i64,
    pub words: Vec<u64>,
    pub ledger: Option<Vec<u8>>,
    pub digest: [u8; 32],
}

impl Snapshot {
    /// SHA-256 over every field except `digest`, little-endian.
    pub fn state_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update((self.maps.len() as u64).to_le_bytes());
        for map in self.maps.maps() {
            hasher.update(map.a.to_le_bytes());
            hasher.update(map.b.to_le_bytes());
        }
        hasher.update((self.seeds.len() as u64).to_le_bytes());
        for seed in &self.seeds {
            hasher.update(seed.to_le_bytes());
        }
        hasher.update(self.capacity.to_le_bytes());
        hasher.update(self.unit.to_le_bytes());
        hasher.update(self.max_reached.to_le_bytes());
        for w in &self.words {
            hasher.update(w.to_le_bytes());
        }
        match &self.ledger {
            Some(tags) => {
                hasher.update([1u8]);
                hasher.update(tags);
            }
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }

    /// Recompute `digest` from the current contents.
    pub fn seal(mut self) -> Self {
        self.digest = self.state_digest();
        self
    }

    /// Write to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = bincode::serialize(self).map_err(io::Error::other)?;
        fs::write(path.as_ref(), &encoded)?;
        info!(path = %path.as_ref().display(), bytes = encoded.len(), max_reached = self.max_reached, "snapshot saved");
        Ok(())
    }

    /// Read from `path` and check version, sizes and digest.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let snapshot: Snapshot = bincode::deserialize(&data).map_err(io::Error::other)?;
        snapshot.validate()?;
        info!(path = %path.as_ref().display(), max_reached = snapshot.max_reached, "snapshot loaded");
        Ok(snapshot)
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(ClosureError::Configuration(format!("snapshot: {}", msg)));

        if self.version != SNAPSHOT_VERSION {
            return bad(format!("unsupported version {} (expected {})", self.version, SNAPSHOT_VERSION));
        }
        if self.strategy == Strategy::Auto {
            return bad("strategy was not resolved".to_string());
        }
        if self.unit == 0 || self.capacity % self.unit != 0 {
            return bad(format!("capacity {} is not a multiple of unit {}", self.capacity, self.unit));
        }
        if self.words.len() as u64 * 64 != self.capacity {
            return bad(format!("{} words do not cover capacity {}", self.words.len(), self.capacity));
        }
        if self.max_reached >= self.capacity as i64 || self.max_reached < -1 {
            return bad(format!("max_reached {} outside capacity {}", self.max_reached, self.capacity));
        }
        // Vectorized runs only stop on unit boundaries
        if self.strategy == Strategy::Vectorized && (self.max_reached + 1) % self.unit as i64 != 0 {
            return bad(format!("max_reached {} is not on a unit {} boundary", self.max_reached, self.unit));
        }
        if let Some(&seed) = self.seeds.iter().find(|&&s| s >= self.capacity) {
            return bad(format!("seed {} outside capacity {}", seed, self.capacity));
        }
        match (&self.ledger, self.provenance.is_enabled()) {
            (Some(l), true) if l.len() == ProvenanceLedger::byte_count(self.capacity) => {}
            (None, false) => {}
            _ => return bad("provenance ledger does not match policy".to_string()),
        }
        if self.state_digest() != self.digest {
            return bad("digest mismatch, file is corrupt".to_string());
        }
        Ok(())
    }
}
