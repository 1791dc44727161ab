//! The numeric kernel seam and logical function identity.
//!
//! Backends evaluate summation terms through the [`SeriesKernel`] trait; the
//! symbolic layer that builds the actual formulas lives behind it. A kernel
//! returns NaN as its failure marker, never panics.

use std::collections::BTreeMap;
use std::sync::Arc;

use xxhash_rust::xxh64::xxh64;

/// Named numeric parameter bindings (`epsilon`, `p_a`, `N`, ...).
///
/// A BTreeMap keeps iteration order stable across runs.
pub type Bindings = BTreeMap<String, f64>;

/// Build bindings from (name, value) pairs.
pub fn bindings(pairs: &[(&str, f64)]) -> Bindings {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

/// The in-process numeric kernel for a computation expressible as
/// `offset(subs) + sum over n of term(n, subs)`.
///
/// `precision` is the requested number of decimal digits; kernels use it to
/// pick internal tolerances. A term that cannot be evaluated returns NaN.
pub trait SeriesKernel: Send + Sync {
    /// The summation term at index `n`.
    fn term(&self, n: u64, subs: &Bindings, precision: u32) -> f64;

    /// Closed-form part added once, outside the summation.
    fn offset(&self, _subs: &Bindings, _precision: u32) -> f64 {
        0.0
    }
}

/// Identity and wiring of a cacheable logical function.
///
/// The content hash covers the function's definition, so changing its
/// behavior moves it to a fresh cache namespace instead of silently reusing
/// stale entries.
#[derive(Clone)]
pub struct FunctionSpec {
    name: String,
    selector: String,
    params: Vec<String>,
    kernel: Arc<dyn SeriesKernel>,
    content_hash: u64,
}

impl FunctionSpec {
    /// Create a spec. `definition` is any stable text describing the
    /// function's current formula; its hash becomes part of the namespace.
    pub fn new(
        name: impl Into<String>,
        selector: impl Into<String>,
        params: Vec<String>,
        definition: &str,
        kernel: Arc<dyn SeriesKernel>,
    ) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            params,
            kernel,
            content_hash: xxh64(definition.as_bytes(), 0),
        }
    }

    /// Logical function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function selector understood by the external tool.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Positional parameter names in the external tool's argument order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The in-process summation kernel.
    pub fn kernel(&self) -> &Arc<dyn SeriesKernel> {
        &self.kernel
    }

    /// Definition content hash.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Cache namespace: `<name>.<4-hex-digit-suffix-of-content-hash>`.
    pub fn namespace(&self) -> String {
        format!("{}.{:04x}", self.name, self.content_hash & 0xffff)
    }
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("selector", &self.selector)
            .field("params", &self.params)
            .field("content_hash", &format_args!("{:016x}", self.content_hash))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Zero;
    impl SeriesKernel for Zero {
        fn term(&self, _n: u64, _subs: &Bindings, _precision: u32) -> f64 {
            0.0
        }
    }

    fn spec(definition: &str) -> FunctionSpec {
        FunctionSpec::new(
            "H_external",
            "H_external",
            vec!["epsilon".into(), "p_a".into(), "N".into()],
            definition,
            Arc::new(Zero),
        )
    }

    #[test]
    fn namespace_has_four_hex_suffix() {
        let ns = spec("v1").namespace();
        let (name, suffix) = ns.rsplit_once('.').unwrap();
        assert_eq!(name, "H_external");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn definition_change_moves_namespace() {
        assert_ne!(spec("v1").namespace(), spec("v2").namespace());
        assert_eq!(spec("v1").namespace(), spec("v1").namespace());
    }

    #[test]
    fn bindings_are_name_ordered() {
        let subs = bindings(&[("epsilon", 0.1), ("N", 100.0), ("p_a", 0.5)]);
        let names: Vec<&str> = subs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["N", "epsilon", "p_a"]);
    }
}
