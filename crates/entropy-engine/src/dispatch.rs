//! Computation method dispatch.
//!
//! A request names a primary method and ordered backups. Each method runs
//! with precision escalation: a retryable failure below the precision cap
//! relaunches the same method with more digits; a failure at the cap
//! exhausts the method and control falls through to the next one. A request
//! whose every method is exhausted resolves to "no result", which the engine
//! caches like any other outcome.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use entropy_engine_core::backend::external::{AsyncInvocation, SubprocessBackend};
use entropy_engine_core::backend::parallel::ParallelSumBackend;
use entropy_engine_core::error::{EngineError, EngineResult};
use entropy_engine_core::kernel::{Bindings, FunctionSpec};
use entropy_engine_core::pending::PendingValue;
use entropy_engine_core::pool::WorkerPool;

/// A computation method the dispatcher can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// In-process summation across the worker pool.
    Parallel,
    /// In-process summation on the calling thread.
    Sequential,
    /// External tool, blocking until it exits.
    ExternalSync,
    /// External tool on a pool worker; slow results come back as pending
    /// handles.
    ExternalAsync,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Parallel => "parallel",
            Method::Sequential => "sequential",
            Method::ExternalSync => "external-sync",
            Method::ExternalAsync => "external-async",
        }
    }

    /// Default method chain: the in-process evaluator backed up by the
    /// external tool.
    pub fn default_chain() -> Vec<Method> {
        vec![Method::Parallel, Method::ExternalSync]
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(Method::Parallel),
            "sequential" => Ok(Method::Sequential),
            "external-sync" => Ok(Method::ExternalSync),
            "external-async" => Ok(Method::ExternalAsync),
            other => Err(EngineError::Argument(format!(
                "unknown computation method '{other}'"
            ))),
        }
    }
}

/// Resolution of a dispatched request.
pub enum Outcome {
    /// Finished: a value, or `None` when every method was exhausted.
    Ready(Option<f64>),
    /// Still running on the external tool.
    Pending(PendingValue),
}

/// Resolution of a single method within the chain.
enum MethodOutcome {
    Value(f64),
    Pending(PendingValue),
    Exhausted,
}

/// Per-request dispatcher over the configured backends.
pub struct Dispatcher<'a> {
    pool: &'a WorkerPool,
    external: Option<&'a SubprocessBackend>,
    precision_step: u32,
    precision_cap: u32,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        pool: &'a WorkerPool,
        external: Option<&'a SubprocessBackend>,
        precision_step: u32,
        precision_cap: u32,
    ) -> Self {
        Self {
            pool,
            external,
            precision_step,
            precision_cap,
        }
    }

    /// Run the method chain until one method resolves the request.
    pub fn run(
        &self,
        spec: &FunctionSpec,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
        methods: &[Method],
    ) -> EngineResult<Outcome> {
        for method in methods {
            debug!(function = spec.name(), %method, precision, "dispatching");
            match self.run_method(*method, spec, subs, bound, precision)? {
                MethodOutcome::Value(value) => return Ok(Outcome::Ready(Some(value))),
                MethodOutcome::Pending(handle) => return Ok(Outcome::Pending(handle)),
                MethodOutcome::Exhausted => {
                    warn!(function = spec.name(), %method, "method exhausted, falling back");
                }
            }
        }
        Ok(Outcome::Ready(None))
    }

    fn run_method(
        &self,
        method: Method,
        spec: &FunctionSpec,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
    ) -> EngineResult<MethodOutcome> {
        match method {
            Method::Parallel | Method::Sequential => {
                self.run_in_process(method, spec, subs, bound, precision)
            }
            Method::ExternalSync | Method::ExternalAsync => {
                self.run_external(method, spec, subs, bound, precision)
            }
        }
    }

    /// In-process summation with the escalation loop around it.
    fn run_in_process(
        &self,
        method: Method,
        spec: &FunctionSpec,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
    ) -> EngineResult<MethodOutcome> {
        let backend = ParallelSumBackend::new(self.pool);
        let kernel = Arc::clone(spec.kernel());
        let mut precision = precision;
        loop {
            let attempt = match method {
                Method::Parallel => backend.sum(&kernel, subs, bound, precision),
                _ => backend.sum_sequential(&kernel, subs, bound, precision),
            };
            match attempt {
                Ok(value) => return Ok(MethodOutcome::Value(value)),
                Err(e) if e.is_retryable() => {
                    if precision >= self.precision_cap {
                        debug!(function = spec.name(), precision, "precision cap reached");
                        return Ok(MethodOutcome::Exhausted);
                    }
                    precision += self.precision_step;
                    debug!(function = spec.name(), precision, "escalating precision");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// External tool invocation; the subprocess backend escalates
    /// internally.
    fn run_external(
        &self,
        method: Method,
        spec: &FunctionSpec,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
    ) -> EngineResult<MethodOutcome> {
        let Some(external) = self.external else {
            warn!(
                function = spec.name(),
                "external method requested but no tool configured"
            );
            return Ok(MethodOutcome::Exhausted);
        };
        let params = ordered_params(spec, subs)?;

        match method {
            Method::ExternalSync => {
                let result = external.invoke_escalating(
                    spec.selector(),
                    &params,
                    precision,
                    bound,
                    self.precision_step,
                    self.precision_cap,
                );
                match result {
                    Ok(value) => Ok(MethodOutcome::Value(value)),
                    Err(e) if e.is_retryable() => Ok(MethodOutcome::Exhausted),
                    Err(e) => Err(e),
                }
            }
            _ => {
                let invocation = external.invoke_async(
                    self.pool,
                    spec.selector(),
                    params,
                    precision,
                    bound,
                    self.precision_step,
                    self.precision_cap,
                );
                match invocation {
                    AsyncInvocation::Immediate(value) => Ok(MethodOutcome::Value(value)),
                    AsyncInvocation::Pending(handle) => Ok(MethodOutcome::Pending(handle)),
                    // An asynchronous failure has already burned through the
                    // escalation ladder on the worker; only fallback is left.
                    AsyncInvocation::Failed(message) => {
                        warn!(function = spec.name(), %message, "asynchronous invocation failed");
                        Ok(MethodOutcome::Exhausted)
                    }
                }
            }
        }
    }
}

/// Bindings in the positional order the external tool expects.
fn ordered_params(spec: &FunctionSpec, subs: &Bindings) -> EngineResult<Vec<f64>> {
    spec.params()
        .iter()
        .map(|name| {
            subs.get(name).copied().ok_or_else(|| {
                EngineError::Argument(format!(
                    "missing parameter '{name}' for {}",
                    spec.name()
                ))
            })
        })
        .collect()
}
