//! Fixed-size worker pool shared by parallel summations and asynchronous
//! subprocess bookkeeping.
//!
//! The pool is created lazily on first need (see `LazyPool`) and lives for
//! the rest of the process; the engine's shutdown releases the handle
//! exactly once.

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// A fixed-size thread pool.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Build a pool with `workers` threads; `0` means the number of
    /// available processing units.
    pub fn new(workers: usize) -> EngineResult<Self> {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("entropy-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;
        debug!(workers, "worker pool created");
        Ok(Self { pool, workers })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a task on the pool without waiting for it.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(task);
    }
}

/// Init-on-first-use holder for the process-wide pool.
pub struct LazyPool {
    workers: usize,
    cell: OnceCell<WorkerPool>,
}

impl LazyPool {
    /// Configure a lazy pool of `workers` threads (0 = all units).
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            cell: OnceCell::new(),
        }
    }

    /// The pool, creating it on first call.
    pub fn get(&self) -> EngineResult<&WorkerPool> {
        self.cell.get_or_try_init(|| WorkerPool::new(self.workers))
    }

    /// Whether the pool was ever created.
    pub fn initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
