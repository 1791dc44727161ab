//! Argument normalization and cache keys.
//!
//! Heterogeneous argument values are canonicalized so that numerically or
//! structurally equivalent argument sets produce identical cache keys. With
//! `n` the normalization function:
//!
//! ```text
//! n(1) == n(1.0) == n(0.9999999999999999) == n(1+0i)   but   n(true) != n(1)
//! n([1, 2]) == n((1, 2))
//! n([1]) == n(1)
//! ```
//!
//! Numbers are rounded at the least significant floating-point decimal digit
//! before keying, so values produced by equivalent range generators do not
//! cause spurious cache misses.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// A heterogeneous argument value, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Text(String),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Seq(Vec<ArgValue>),
    Map(Vec<(ArgValue, ArgValue)>),
    /// A value with no numeric interpretation; passes through unchanged.
    Opaque(String),
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Text(v.to_string())
    }
}

impl From<Vec<ArgValue>> for ArgValue {
    fn from(v: Vec<ArgValue>) -> Self {
        ArgValue::Seq(v)
    }
}

/// A canonicalized value. `Eq` and `Hash` are exact: numbers are stored as
/// the bit patterns of their rounded parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizedValue {
    Bool(bool),
    Text(String),
    Number { re_bits: u64, im_bits: u64 },
    Tuple(Vec<NormalizedValue>),
    Opaque(String),
}

impl NormalizedValue {
    fn from_complex(value: Complex64, round_digits: Option<u32>) -> Self {
        let (re, im) = match round_digits {
            Some(digits) => (
                round_to_digits(value.re, digits),
                round_to_digits(value.im, digits),
            ),
            None => (value.re, value.im),
        };
        NormalizedValue::Number {
            re_bits: canonical_bits(re),
            im_bits: canonical_bits(im),
        }
    }

    /// The numeric interpretation, if this is a number.
    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            NormalizedValue::Number { re_bits, im_bits } => Some(Complex64::new(
                f64::from_bits(*re_bits),
                f64::from_bits(*im_bits),
            )),
            _ => None,
        }
    }
}

/// Round to `digits` decimal digits after the point.
///
/// Magnitudes of 2^53 and above are integer-valued, so there is nothing
/// fractional to round and the scaling below could overflow to infinity,
/// collapsing distinct values onto one key. They pass through on their
/// exact bits instead.
fn round_to_digits(x: f64, digits: u32) -> f64 {
    const FRACTION_LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53
    if !x.is_finite() || x.abs() >= FRACTION_LIMIT {
        return x;
    }
    let factor = 10f64.powi(digits as i32);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / factor
}

/// Collapses `-0.0` into `0.0` so both hash identically.
fn canonical_bits(x: f64) -> u64 {
    if x == 0.0 {
        0f64.to_bits()
    } else {
        x.to_bits()
    }
}

/// Canonicalize a value per the rules in the module docs.
///
/// Never panics: values without a numeric interpretation degrade to
/// themselves instead of aborting the caller.
pub fn normalize(value: &ArgValue, round_digits: Option<u32>) -> NormalizedValue {
    match value {
        // Booleans must not collapse into the numeric branch.
        ArgValue::Bool(b) => NormalizedValue::Bool(*b),
        ArgValue::Text(s) => NormalizedValue::Text(s.clone()),
        ArgValue::Opaque(s) => NormalizedValue::Opaque(s.clone()),
        ArgValue::Map(pairs) => NormalizedValue::Tuple(
            pairs
                .iter()
                .map(|(k, v)| {
                    NormalizedValue::Tuple(vec![
                        normalize(k, round_digits),
                        normalize(v, round_digits),
                    ])
                })
                .collect(),
        ),
        ArgValue::Seq(items) => {
            if items.len() == 1 {
                // A singleton collapses to its sole element, so f([1])
                // and f(1) share a cache entry.
                normalize(&items[0], round_digits)
            } else {
                NormalizedValue::Tuple(
                    items.iter().map(|v| normalize(v, round_digits)).collect(),
                )
            }
        }
        ArgValue::Int(i) => {
            NormalizedValue::from_complex(Complex64::new(*i as f64, 0.0), round_digits)
        }
        ArgValue::Float(f) => {
            NormalizedValue::from_complex(Complex64::new(*f, 0.0), round_digits)
        }
        ArgValue::Complex(re, im) => {
            NormalizedValue::from_complex(Complex64::new(*re, *im), round_digits)
        }
    }
}

/// An ordered sequence of (parameter name, normalized value) pairs, sorted
/// by name. Equivalent argument sets produce identical keys regardless of
/// input container type or floating-point noise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pairs: Vec<(String, NormalizedValue)>,
}

impl CacheKey {
    /// Build a key from named argument bindings.
    pub fn from_bindings(bindings: &[(&str, ArgValue)], round_digits: Option<u32>) -> Self {
        Self::from_bindings_ignoring(bindings, &[], round_digits)
    }

    /// Build a key, excluding the named parameters from it.
    pub fn from_bindings_ignoring(
        bindings: &[(&str, ArgValue)],
        ignore: &[&str],
        round_digits: Option<u32>,
    ) -> Self {
        let mut pairs: Vec<(String, NormalizedValue)> = bindings
            .iter()
            .filter(|(name, _)| !ignore.contains(name))
            .map(|(name, value)| (name.to_string(), normalize(value, round_digits)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        CacheKey { pairs }
    }

    /// The sorted (name, value) pairs.
    pub fn pairs(&self) -> &[(String, NormalizedValue)] {
        &self.pairs
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        write!(f, "}}")
    }
}
