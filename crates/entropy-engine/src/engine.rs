//! The engine root resource.
//!
//! Owns the worker pool, the per-function cache stores, the external tool
//! backend and the pending-result tracker. Every computation funnels through
//! [`Engine::compute`], which consults the cache before dispatching and
//! persists whatever the dispatcher resolves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use entropy_engine_core::backend::external::SubprocessBackend;
use entropy_engine_core::config::EngineConfig;
use entropy_engine_core::error::{EngineError, EngineResult};
use entropy_engine_core::kernel::{Bindings, FunctionSpec};
use entropy_engine_core::normalize::{ArgValue, CacheKey};
use entropy_engine_core::pending::{PendingCompute, PendingTracker};
use entropy_engine_core::pool::LazyPool;
use entropy_engine_storage::{CacheValue, FunctionStore, StoreError, StoreRegistry};

use crate::dispatch::{Dispatcher, Method, Outcome};

fn store_err(e: StoreError) -> EngineError {
    EngineError::Store(e.to_string())
}

/// Cached, multi-backend computation engine.
pub struct Engine {
    config: EngineConfig,
    pool: LazyPool,
    registry: StoreRegistry,
    tracker: PendingTracker,
    external: Option<SubprocessBackend>,
    closed: AtomicBool,
}

impl Engine {
    /// Build an engine from validated configuration.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let external = match &config.external_tool {
            Some(tool) => Some(SubprocessBackend::new(
                tool.clone(),
                Duration::from_secs(config.external_timeout_secs),
                Duration::from_millis(config.external_poll_ms),
            )?),
            None => None,
        };
        let registry = StoreRegistry::new(
            config.cache_root.clone(),
            config.size_limit,
            config.eviction_policy,
        );
        info!(cache_root = %config.cache_root.display(), "engine initialized");
        Ok(Self {
            pool: LazyPool::new(config.workers),
            registry,
            tracker: PendingTracker::new(),
            external,
            closed: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The open cache store for a function, for export or inspection.
    pub fn store(&self, spec: &FunctionSpec) -> EngineResult<Arc<FunctionStore>> {
        self.registry.open(&spec.namespace()).map_err(store_err)
    }

    /// Canonical cache key for a request. The bound and precision are part
    /// of the key; the method chain is not, since every method computes the
    /// same quantity.
    fn cache_key(&self, subs: &Bindings, bound: Option<u64>, precision: u32) -> CacheKey {
        let mut args: Vec<(&str, ArgValue)> = subs
            .iter()
            .map(|(name, value)| (name.as_str(), ArgValue::Float(*value)))
            .collect();
        if let Some(k) = bound {
            args.push(("bound", ArgValue::Int(k as i64)));
        }
        args.push(("precision", ArgValue::Int(i64::from(precision))));
        CacheKey::from_bindings(&args, self.config.round_digits)
    }

    /// Compute (or recall) a function value.
    ///
    /// Resolution order: persistent cache, in-flight duplicates, then the
    /// method chain. A finished outcome is persisted before it is returned,
    /// including the no-result sentinel for exhausted requests.
    pub fn compute(
        &self,
        spec: &FunctionSpec,
        subs: &Bindings,
        bound: Option<u64>,
        precision: u32,
        methods: &[Method],
    ) -> EngineResult<Outcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Store("engine is shut down".into()));
        }
        let namespace = spec.namespace();
        let key = self.cache_key(subs, bound, precision);
        let store = self.registry.open(&namespace).map_err(store_err)?;

        match store.get(&key) {
            Ok(value) => {
                debug!(function = spec.name(), %key, "cache hit");
                return Ok(Outcome::Ready(value.as_option()));
            }
            Err(StoreError::Miss { .. }) => {}
            Err(e) => return Err(store_err(e)),
        }

        if let Some(handle) = self.tracker.lookup(&namespace, &key) {
            debug!(function = spec.name(), %key, "joining in-flight computation");
            return Ok(Outcome::Pending(handle));
        }

        let dispatcher = Dispatcher::new(
            self.pool.get()?,
            self.external.as_ref(),
            self.config.precision_step,
            self.config.precision_cap,
        );
        match dispatcher.run(spec, subs, bound, precision, methods)? {
            Outcome::Ready(value) => {
                store
                    .set(&key, CacheValue::from_outcome(value))
                    .map_err(store_err)?;
                Ok(Outcome::Ready(value))
            }
            Outcome::Pending(handle) => {
                self.tracker.register(&namespace, key, Arc::clone(&handle));
                Ok(Outcome::Pending(handle))
            }
        }
    }

    /// Number of computations still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Consolidate finished pending results into the caches and close every
    /// store. Idempotent; the first call wins.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let outstanding = self.tracker.drain();
        if !outstanding.is_empty() {
            info!(count = outstanding.len(), "consolidating pending results");
        }
        for ((namespace, key), handle) in outstanding {
            if !handle.ready() {
                warn!(%namespace, %key, "abandoning unfinished computation");
                continue;
            }
            if !handle.successful() {
                debug!(%namespace, %key, "dropping failed pending result");
                continue;
            }
            let value = match handle.get(None) {
                Ok(value) => value,
                Err(e) => {
                    warn!(%namespace, %key, %e, "pending result retrieval failed");
                    continue;
                }
            };
            match self.registry.open(&namespace) {
                Ok(store) => {
                    if let Err(e) = store.set(&key, CacheValue::from_outcome(Some(value))) {
                        warn!(%namespace, %key, %e, "persisting pending result failed");
                    }
                }
                Err(e) => warn!(%namespace, %e, "opening store for consolidation failed"),
            }
        }
        self.registry.close_all();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
