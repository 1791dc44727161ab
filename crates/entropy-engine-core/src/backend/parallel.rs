//! In-process summation backend.
//!
//! Splits a summation over `n = 0..=k` across the fixed worker pool with a
//! strided assignment: worker `c` of `W` sums the terms at indices
//! `c, c+W, c+2W, …`, so no worker holds more than about `k/W` terms. The
//! partial sums are combined by plain addition.
//!
//! A partial sum of exactly zero signals numeric underflow or an invalid
//! evaluation rather than a legitimate zero, and fails the whole computation
//! as retryable.

use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::kernel::{Bindings, SeriesKernel};
use crate::pool::WorkerPool;

/// Consecutive negligible terms required to accept convergence of an
/// unbounded summation.
const TAIL_RUN: u32 = 4;

/// Hard per-worker term cap for unbounded summations.
const MAX_TERMS_PER_WORKER: u64 = 100_000;

/// Strided partial sum for worker `stride_offset` out of `stride`.
///
/// Returns NaN on any unevaluable term, and for unbounded sums that never
/// reach the convergence tail.
fn partial_sum(
    kernel: &dyn SeriesKernel,
    subs: &Bindings,
    stride_offset: u64,
    stride: u64,
    bound: Option<u64>,
    precision: u32,
) -> f64 {
    let negligible = 10f64.powi(-(precision.min(300) as i32 + 2));
    let mut sum = 0.0_f64;
    let mut tail = 0u32;
    let mut n = stride_offset;
    let mut terms = 0u64;

    loop {
        if let Some(k) = bound {
            if n > k {
                return sum;
            }
        } else if terms >= MAX_TERMS_PER_WORKER {
            return f64::NAN;
        }

        let term = kernel.term(n, subs, precision);
        if term.is_nan() {
            return f64::NAN;
        }
        sum += term;
        terms += 1;

        if bound.is_none() {
            // Require a run of negligible terms before trusting the tail:
            // these series can have interior zeros (e.g. log₂ 0! = log₂ 1! = 0).
            if term.abs() <= negligible * sum.abs().max(1.0) && terms > 1 {
                tail += 1;
                if tail >= TAIL_RUN {
                    return sum;
                }
            } else {
                tail = 0;
            }
        }

        n += stride;
    }
}

/// Parallel (and sequential) summation evaluator.
pub struct ParallelSumBackend<'a> {
    pool: &'a WorkerPool,
}

impl<'a> ParallelSumBackend<'a> {
    pub fn new(pool: &'a WorkerPool) -> Self {
        Self { pool }
    }

    /// Sum the series across the worker pool.
    pub fn sum(
        &self,
        kernel: &Arc<dyn SeriesKernel>,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
    ) -> EngineResult<f64> {
        // Clamp so every active worker owns at least one term; otherwise a
        // short finite sum would produce empty partials and trip the
        // zero-partial check below.
        let workers = match bound {
            Some(k) => (self.pool.workers() as u64).min(k + 1),
            None => self.pool.workers() as u64,
        };

        let (tx, rx) = crossbeam_channel::bounded(workers as usize);
        for c in 0..workers {
            let tx = tx.clone();
            let kernel = Arc::clone(kernel);
            let subs = subs.clone();
            self.pool.spawn(move || {
                let partial = partial_sum(kernel.as_ref(), &subs, c, workers, bound, precision);
                let _ = tx.send(partial);
            });
        }
        drop(tx);

        let mut total = 0.0_f64;
        for partial in rx.iter() {
            if partial.is_nan() {
                return Err(EngineError::Retryable(format!(
                    "parallel sum did not converge at precision {precision}"
                )));
            }
            if partial == 0.0 {
                // Underflow signal, per the failure policy.
                return Err(EngineError::Retryable(format!(
                    "zero partial sum at precision {precision}"
                )));
            }
            total += partial;
        }

        let result = total + kernel.offset(subs, precision);
        if result.is_nan() {
            return Err(EngineError::Retryable(format!(
                "invalid result at precision {precision}"
            )));
        }
        debug!(precision, workers, result, "parallel sum complete");
        Ok(result)
    }

    /// Sequential evaluation: the same summation with a single stride, on
    /// the calling thread.
    pub fn sum_sequential(
        &self,
        kernel: &Arc<dyn SeriesKernel>,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
    ) -> EngineResult<f64> {
        let partial = partial_sum(kernel.as_ref(), subs, 0, 1, bound, precision);
        if partial.is_nan() {
            return Err(EngineError::Retryable(format!(
                "sum did not converge at precision {precision}"
            )));
        }
        if partial == 0.0 {
            return Err(EngineError::Retryable(format!(
                "zero sum at precision {precision}"
            )));
        }
        let result = partial + kernel.offset(subs, precision);
        if result.is_nan() {
            return Err(EngineError::Retryable(format!(
                "invalid result at precision {precision}"
            )));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::bindings;
    use crate::series::ExternalEntropy;

    /// Geometric series with known sum 2 (ratio 1/2).
    struct Geometric;
    impl SeriesKernel for Geometric {
        fn term(&self, n: u64, _subs: &Bindings, _precision: u32) -> f64 {
            0.5f64.powi(n as i32)
        }
    }

    struct AlwaysNan;
    impl SeriesKernel for AlwaysNan {
        fn term(&self, _n: u64, _subs: &Bindings, _precision: u32) -> f64 {
            f64::NAN
        }
    }

    struct AlwaysZero;
    impl SeriesKernel for AlwaysZero {
        fn term(&self, _n: u64, _subs: &Bindings, _precision: u32) -> f64 {
            0.0
        }
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(4).unwrap()
    }

    #[test]
    fn parallel_matches_sequential_on_finite_bound() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(Geometric);
        let subs = bindings(&[]);

        let parallel = backend.sum(&kernel, &subs, Some(50), 15).unwrap();
        let sequential = backend.sum_sequential(&kernel, &subs, Some(50), 15).unwrap();
        assert!((parallel - sequential).abs() < 1e-12);
        assert!((parallel - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unbounded_sum_converges() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(Geometric);
        let subs = bindings(&[]);

        let value = backend.sum(&kernel, &subs, None, 15).unwrap();
        assert!((value - 2.0).abs() < 1e-9, "value was {value}");
    }

    #[test]
    fn entropy_parallel_matches_sequential() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(ExternalEntropy);
        let subs = bindings(&[("epsilon", 1.0), ("p_a", 0.5), ("N", 5.0)]);

        let parallel = backend.sum(&kernel, &subs, Some(400), 15).unwrap();
        let sequential = backend
            .sum_sequential(&kernel, &subs, Some(400), 15)
            .unwrap();
        assert!(
            (parallel - sequential).abs() < 1e-9,
            "parallel {parallel} vs sequential {sequential}"
        );
        assert!(parallel > 0.0);
    }

    #[test]
    fn nan_term_is_retryable() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(AlwaysNan);
        let subs = bindings(&[]);

        let err = backend.sum(&kernel, &subs, Some(10), 15).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn zero_partial_is_retryable() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(AlwaysZero);
        let subs = bindings(&[]);

        let err = backend.sum(&kernel, &subs, Some(10), 15).unwrap_err();
        assert!(err.is_retryable());
        let err = backend.sum_sequential(&kernel, &subs, Some(10), 15).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn bound_smaller_than_pool_still_works() {
        let pool = pool();
        let backend = ParallelSumBackend::new(&pool);
        let kernel: Arc<dyn SeriesKernel> = Arc::new(Geometric);
        let subs = bindings(&[]);

        // k + 1 = 2 active workers out of 4.
        let value = backend.sum(&kernel, &subs, Some(1), 15).unwrap();
        assert!((value - 1.5).abs() < 1e-12);
    }
}
