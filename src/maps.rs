//! Affine maps `x ↦ a·x + b` and ordered map sets.
//!
//! A [`MapSet`] is a plain data table of coefficient pairs. It is fixed for the
//! lifetime of a run and defines the recurrence
//!
//! ```text
//! reachable(a·x + b)  ⟸  reachable(x)      for every (a, b) and every x ≥ 0
//! ```
//!
//! # Example
//!
//! ```
//! use affine_closure::{AffineMap, MapSet};
//!
//! let maps = MapSet::reference();
//! assert_eq!(maps.apply_once(5), vec![11, 15, 17, 22]);
//! assert_eq!(maps.unit(), Some(1536));
//! assert_eq!(AffineMap::new(2, 1).unwrap().apply(7), 15);
//! ```

use crate::error::{ClosureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest allowed scale factor `a`.
pub const LINEAR_COEFF_MAX: i64 = 256;
/// Largest allowed offset `b`.
pub const LINEAR_CONST_MAX: i64 = 512;
/// Largest map count a 4-bit provenance tag can name.
pub const MAX_MAPS: usize = 15;
/// Bits per storage word.
pub const WORD_BITS: u64 = 64;
/// Largest processing unit (in bits) the vectorized engine accepts.
pub const MAX_UNIT: u64 = 1 << 20;

/// Unit used when a map set has no bounded vectorization unit.
pub const SCALAR_UNIT: u64 = WORD_BITS;

/// A single forward map `x ↦ a·x + b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineMap {
    pub a: i64,
    pub b: i64,
}

impl AffineMap {
    /// Validated constructor: `1 < a ≤ 256`, `b ≥ -a`, `b ≤ 512`.
    pub fn new(a: i64, b: i64) -> Result<Self> {
        let map = Self { a, b };
        map.validate()?;
        Ok(map)
    }

    /// Check the coefficient bounds.
    pub fn validate(&self) -> Result<()> {
        let (a, b) = (self.a, self.b);
        if a <= 1 {
            return Err(ClosureError::InvalidMap { a, b, reason: "a must exceed 1" });
        }
        if a > LINEAR_COEFF_MAX {
            return Err(ClosureError::InvalidMap { a, b, reason: "a must not exceed 256" });
        }
        if b < -a {
            return Err(ClosureError::InvalidMap { a, b, reason: "b must be >= -a" });
        }
        if b > LINEAR_CONST_MAX {
            return Err(ClosureError::InvalidMap { a, b, reason: "b must not exceed 512" });
        }
        Ok(())
    }

    #[inline]
    pub fn apply(&self, x: i64) -> i64 {
        self.a * x + self.b
    }

    /// The unique `x ≥ 0` with `a·x + b = y`, if any.
    #[inline]
    pub fn preimage(&self, y: u64) -> Option<u64> {
        let k = y as i64 - self.b;
        if k >= 0 && k % self.a == 0 {
            Some((k / self.a) as u64)
        } else {
            None
        }
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.b == 0 {
            write!(f, "{}x", self.a)
        } else {
            write!(f, "{}x{:+}", self.a, self.b)
        }
    }
}

impl std::str::FromStr for AffineMap {
    type Err = ClosureError;

    /// Parses `"a,b"` (e.g. `"3,7"` for `3x+7`).
    fn from_str(s: &str) -> Result<Self> {
        let (a, b) = s.split_once(',').ok_or_else(|| {
            ClosureError::Configuration(format!("map '{}' must be written as a,b", s))
        })?;
        let parse = |v: &str| {
            v.trim().parse::<i64>().map_err(|e| {
                ClosureError::Configuration(format!("map '{}': {}", s, e))
            })
        };
        AffineMap::new(parse(a)?, parse(b)?)
    }
}

/// Ordered, validated, non-empty list of affine maps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AffineMap>", into = "Vec<AffineMap>")]
pub struct MapSet {
    maps: Vec<AffineMap>,
}

impl MapSet {
    /// Validate and wrap a list of maps.
    pub fn new(maps: Vec<AffineMap>) -> Result<Self> {
        if maps.is_empty() {
            return Err(ClosureError::InvalidMapSet("at least one map is required".into()));
        }
        if maps.len() > MAX_MAPS {
            return Err(ClosureError::InvalidMapSet(format!(
                "{} maps given, at most {} supported",
                maps.len(),
                MAX_MAPS
            )));
        }
        for m in &maps {
            m.validate()?;
        }
        Ok(Self { maps })
    }

    /// Build from raw coefficient pairs.
    pub fn from_pairs(pairs: &[(i64, i64)]) -> Result<Self> {
        Self::new(pairs.iter().map(|&(a, b)| AffineMap { a, b }).collect())
    }

    /// The reference set `{2x+1, 3x, 3x+2, 3x+7}`.
    pub fn reference() -> Self {
        Self {
            maps: vec![
                AffineMap { a: 2, b: 1 },
                AffineMap { a: 3, b: 0 },
                AffineMap { a: 3, b: 2 },
                AffineMap { a: 3, b: 7 },
            ],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    #[inline]
    pub fn maps(&self) -> &[AffineMap] {
        &self.maps
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&AffineMap> {
        self.maps.get(idx)
    }

    /// Coefficient pairs in list order.
    pub fn coeffs(&self) -> Vec<(i64, i64)> {
        self.maps.iter().map(|m| (m.a, m.b)).collect()
    }

    /// Image of `x` under every map, in list order.
    pub fn apply_once(&self, x: i64) -> Vec<i64> {
        self.maps.iter().map(|m| m.apply(x)).collect()
    }

    /// Least common multiple of all scale factors.
    pub fn scale_lcm(&self) -> Option<u64> {
        self.maps.iter().try_fold(1u64, |acc, m| {
            let a = m.a as u64;
            (acc / gcd(acc, a)).checked_mul(a)
        })
    }

    /// Vectorization unit in bits: `256 · lcm(a)`, if at most [`MAX_UNIT`].
    ///
    /// A unit spans a whole number of 64-bit words for every scale factor, so
    /// each map's image of a unit-aligned source run starts on a word edge.
    pub fn unit(&self) -> Option<u64> {
        let unit = self.scale_lcm()?.checked_mul(4 * WORD_BITS)?;
        (unit <= MAX_UNIT).then_some(unit)
    }

    /// Check that the doubling-window schedule is sound for this set.
    ///
    /// A window `[L, 2L)` may only read indices below `L`, which requires
    /// `a·L + b ≥ 2L` for every map and every admissible `L ≥ unit`.
    pub fn check_vectorizable(&self) -> Result<u64> {
        let unit = self.unit().ok_or_else(|| {
            ClosureError::Unvectorizable(format!(
                "lcm of scale factors exceeds {} bits per unit",
                MAX_UNIT
            ))
        })?;
        for m in &self.maps {
            if (m.a - 2) * unit as i64 + m.b < 0 {
                return Err(ClosureError::Unvectorizable(format!(
                    "{} can map a window onto itself",
                    m
                )));
            }
        }
        Ok(unit)
    }
}

impl TryFrom<Vec<AffineMap>> for MapSet {
    type Error = ClosureError;

    fn try_from(maps: Vec<AffineMap>) -> Result<Self> {
        MapSet::new(maps)
    }
}

impl From<MapSet> for Vec<AffineMap> {
    fn from(set: MapSet) -> Self {
        set.maps
    }
}

impl Default for MapSet {
    fn default() -> Self {
        Self::reference()
    }
}

impl fmt::Display for MapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.maps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", m)?;
        }
        write!(f, "}}")
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_apply_once() {
        let maps = MapSet::reference();
        assert_eq!(maps.len(), 4);
        assert_eq!(maps.apply_once(5), vec![11, 15, 17, 22]);
    }

    #[test]
    fn test_validation() {
        assert!(AffineMap::new(2, 1).is_ok());
        assert!(AffineMap::new(2, -2).is_ok());
        assert!(AffineMap::new(256, 512).is_ok());

        for (a, b) in [(1, 0), (0, 0), (257, 0), (3, -4), (2, 513)] {
            let err = AffineMap::new(a, b).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "({}, {})", a, b);
        }

        assert!(MapSet::new(vec![]).is_err());
        let many = vec![AffineMap { a: 2, b: 0 }; MAX_MAPS + 1];
        assert!(MapSet::new(many).is_err());
    }

    #[test]
    fn test_unit() {
        assert_eq!(MapSet::reference().unit(), Some(1536));
        assert_eq!(MapSet::from_pairs(&[(2, 0)]).unwrap().unit(), Some(512));
        assert_eq!(MapSet::from_pairs(&[(4, 1), (6, 0)]).unwrap().unit(), Some(256 * 12));
        // 251 * 241 * 239 * 233 overflows the unit bound
        let primes = MapSet::from_pairs(&[(251, 0), (241, 0), (239, 0), (233, 0)]).unwrap();
        assert_eq!(primes.unit(), None);
    }

    #[test]
    fn test_vectorizable() {
        assert_eq!(MapSet::reference().check_vectorizable().unwrap(), 1536);
        assert!(MapSet::from_pairs(&[(3, -3), (5, 11)]).unwrap().check_vectorizable().is_ok());

        let err = MapSet::from_pairs(&[(2, -1)]).unwrap().check_vectorizable().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_preimage() {
        let m = AffineMap { a: 3, b: 7 };
        assert_eq!(m.preimage(22), Some(5));
        assert_eq!(m.preimage(7), Some(0));
        assert_eq!(m.preimage(6), None);
        assert_eq!(m.preimage(23), None);
    }

    #[test]
    fn test_parse_and_display() {
        let m: AffineMap = "3, 7".parse().unwrap();
        assert_eq!(m, AffineMap { a: 3, b: 7 });
        assert_eq!(m.to_string(), "3x+7");
        assert_eq!(AffineMap { a: 3, b: 0 }.to_string(), "3x");
        assert!("3".parse::<AffineMap>().is_err());
        assert!("1,0".parse::<AffineMap>().is_err());
        assert_eq!(MapSet::reference().to_string(), "{2x+1, 3x, 3x+2, 3x+7}");
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let ok: MapSet = serde_json::from_str(r#"[{"a":2,"b":1}]"#).unwrap();
        assert_eq!(ok.len(), 1);
        assert!(serde_json::from_str::<MapSet>(r#"[{"a":1,"b":1}]"#).is_err());
    }
}
