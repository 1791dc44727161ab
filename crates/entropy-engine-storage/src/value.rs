//! Cached value representation.

use serde::{Deserialize, Serialize};

/// A persisted computation outcome.
///
/// `NoResult` records that every method (at every precision up to the cap)
/// failed for these arguments, so later calls return the failure from cache
/// instead of burning hours rediscovering it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    /// A successfully computed number.
    Number(f64),
    /// The computation was attempted and exhausted every method.
    NoResult,
}

impl CacheValue {
    /// Wrap a computation outcome; `None` and non-finite values persist as
    /// the no-result sentinel.
    pub fn from_outcome(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => CacheValue::Number(v),
            _ => CacheValue::NoResult,
        }
    }

    /// The cached number, or `None` for the sentinel.
    pub fn as_option(&self) -> Option<f64> {
        match self {
            CacheValue::Number(v) => Some(*v),
            CacheValue::NoResult => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trip() {
        assert_eq!(
            CacheValue::from_outcome(Some(2.5)).as_option(),
            Some(2.5)
        );
        assert_eq!(CacheValue::from_outcome(None).as_option(), None);
        assert_eq!(CacheValue::from_outcome(Some(f64::NAN)).as_option(), None);
    }

    #[test]
    fn sentinel_survives_serialization() {
        let bytes = bincode::serialize(&CacheValue::NoResult).unwrap();
        let back: CacheValue = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, CacheValue::NoResult);
    }
}
