//! Entropy and mutual-information entry points.
//!
//! One function per entropy measure of the gene-expression models: the
//! constitutive (Poisson) gene, the externally regulated binary gene, and
//! the promoter-state conditionals. Mutual information combines three
//! entropies; when any of them is still running the combination comes back
//! as a composite pending handle that applies the formula on retrieval.

use std::sync::Arc;

use once_cell::sync::Lazy;

use entropy_engine_core::error::EngineResult;
use entropy_engine_core::kernel::{bindings, FunctionSpec};
use entropy_engine_core::pending::{CompositePending, PendingCompute, PendingValue, ReadyValue};
use entropy_engine_core::series;

use crate::dispatch::{Method, Outcome};
use crate::engine::Engine;

/// Constitutive gene: `H = -N·log₂(N/e) + Σ N^n/n!·e^(-N)·log₂(n!)`.
static CONSTITUTIVE: Lazy<FunctionSpec> = Lazy::new(|| {
    FunctionSpec::new(
        "H_constitutive",
        "H_constitutive",
        vec!["N".into()],
        "poisson-entropy-v1",
        series::constitutive_kernel(),
    )
});

/// Externally regulated gene: `H = -Σ φₙ·log₂ φₙ`.
static EXTERNAL: Lazy<FunctionSpec> = Lazy::new(|| {
    FunctionSpec::new(
        "H_external",
        "H_external",
        vec!["epsilon".into(), "p_a".into(), "N".into()],
        "external-entropy-v1",
        series::external_kernel(),
    )
});

/// Entropy conditional to the promoter being ON: `-Σ (αₙ/pₐ)·log₂(αₙ/pₐ)`.
static ON_EXTERNAL: Lazy<FunctionSpec> = Lazy::new(|| {
    FunctionSpec::new(
        "H_ON_external",
        "H_ON_external",
        vec!["epsilon".into(), "p_a".into(), "N".into()],
        "on-entropy-v1",
        series::on_kernel(),
    )
});

/// Entropy conditional to the promoter being OFF.
static OFF_EXTERNAL: Lazy<FunctionSpec> = Lazy::new(|| {
    FunctionSpec::new(
        "H_OFF_external",
        "H_OFF_external",
        vec!["epsilon".into(), "p_a".into(), "N".into()],
        "off-entropy-v1",
        series::off_kernel(),
    )
});

pub fn constitutive_spec() -> FunctionSpec {
    CONSTITUTIVE.clone()
}

pub fn external_spec() -> FunctionSpec {
    EXTERNAL.clone()
}

pub fn on_external_spec() -> FunctionSpec {
    ON_EXTERNAL.clone()
}

pub fn off_external_spec() -> FunctionSpec {
    OFF_EXTERNAL.clone()
}

/// Shannon entropy for the constitutive gene model.
pub fn h_constitutive(
    engine: &Engine,
    n_mean: f64,
    precision: u32,
    methods: &[Method],
) -> EngineResult<Outcome> {
    let subs = bindings(&[("N", n_mean)]);
    engine.compute(&CONSTITUTIVE, &subs, None, precision, methods)
}

/// Shannon entropy for the externally regulated gene model.
pub fn h_external(
    engine: &Engine,
    epsilon: f64,
    palpha: f64,
    n_mean: f64,
    bound: Option<u64>,
    precision: u32,
    methods: &[Method],
) -> EngineResult<Outcome> {
    let subs = bindings(&[("epsilon", epsilon), ("p_a", palpha), ("N", n_mean)]);
    engine.compute(&EXTERNAL, &subs, bound, precision, methods)
}

/// Entropy conditional to the promoter state being ON.
pub fn h_on_external(
    engine: &Engine,
    epsilon: f64,
    palpha: f64,
    n_mean: f64,
    bound: Option<u64>,
    precision: u32,
    methods: &[Method],
) -> EngineResult<Outcome> {
    let subs = bindings(&[("epsilon", epsilon), ("p_a", palpha), ("N", n_mean)]);
    engine.compute(&ON_EXTERNAL, &subs, bound, precision, methods)
}

/// Entropy conditional to the promoter state being OFF.
pub fn h_off_external(
    engine: &Engine,
    epsilon: f64,
    palpha: f64,
    n_mean: f64,
    bound: Option<u64>,
    precision: u32,
    methods: &[Method],
) -> EngineResult<Outcome> {
    let subs = bindings(&[("epsilon", epsilon), ("p_a", palpha), ("N", n_mean)]);
    engine.compute(&OFF_EXTERNAL, &subs, bound, precision, methods)
}

/// Mutual information for the externally regulated gene model:
/// `I = H − pₐ·H_ON − (1 − pₐ)·H_OFF`.
///
/// If any constituent entropy exhausted its methods the whole quantity is
/// unresolvable and comes back `Ready(None)`. If any constituent is still
/// running, the result is a composite pending handle.
pub fn i_external(
    engine: &Engine,
    epsilon: f64,
    palpha: f64,
    n_mean: f64,
    bound: Option<u64>,
    precision: u32,
    methods: &[Method],
) -> EngineResult<Outcome> {
    let h = h_external(engine, epsilon, palpha, n_mean, bound, precision, methods)?;
    let h_on = h_on_external(engine, epsilon, palpha, n_mean, bound, precision, methods)?;
    let h_off = h_off_external(engine, epsilon, palpha, n_mean, bound, precision, methods)?;

    let mut parts: Vec<PendingValue> = Vec::with_capacity(3);
    let mut any_pending = false;
    for outcome in [h, h_on, h_off] {
        match outcome {
            Outcome::Ready(Some(value)) => parts.push(Arc::new(ReadyValue(value))),
            Outcome::Ready(None) => return Ok(Outcome::Ready(None)),
            Outcome::Pending(handle) => {
                any_pending = true;
                parts.push(handle);
            }
        }
    }

    let combine =
        move |values: &[f64]| values[0] - palpha * values[1] - (1.0 - palpha) * values[2];
    if any_pending {
        Ok(Outcome::Pending(CompositePending::new(parts, combine)))
    } else {
        let values: Vec<f64> = parts
            .iter()
            .map(|part| part.get(None))
            .collect::<EngineResult<_>>()?;
        Ok(Outcome::Ready(Some(combine(&values))))
    }
}
