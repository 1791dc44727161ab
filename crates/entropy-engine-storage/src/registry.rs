//! Registry of open per-function stores.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use entropy_engine_core::config::EvictionPolicy;

use crate::error::{StoreError, StoreResult};
use crate::store::FunctionStore;

/// Opens each function's cache lazily on first use and hands out shared
/// handles afterwards, so a process never opens the same RocksDB directory
/// twice.
pub struct StoreRegistry {
    root: PathBuf,
    size_limit: u64,
    policy: EvictionPolicy,
    inner: Mutex<Option<HashMap<String, Arc<FunctionStore>>>>,
}

impl StoreRegistry {
    pub fn new(root: PathBuf, size_limit: u64, policy: EvictionPolicy) -> Self {
        Self {
            root,
            size_limit,
            policy,
            inner: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Directory holding every function's cache.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// The open store for `namespace`, opening it on first use.
    pub fn open(&self, namespace: &str) -> StoreResult<Arc<FunctionStore>> {
        let mut guard = self.inner.lock();
        let stores = guard
            .as_mut()
            .ok_or_else(|| StoreError::Closed(namespace.to_string()))?;
        if let Some(store) = stores.get(namespace) {
            return Ok(Arc::clone(store));
        }
        std::fs::create_dir_all(&self.root).map_err(|e| StoreError::OpenFailed {
            path: self.root.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        let store = Arc::new(FunctionStore::open(
            &self.root,
            namespace,
            self.size_limit,
            self.policy,
        )?);
        stores.insert(namespace.to_string(), Arc::clone(&store));
        debug!(namespace, "registered function cache");
        Ok(store)
    }

    /// Number of currently open stores.
    pub fn len(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every open store. Idempotent; later `open` calls fail.
    pub fn close_all(&self) {
        let stores = match self.inner.lock().take() {
            Some(stores) => stores,
            None => return,
        };
        for (namespace, store) in stores {
            if let Err(e) = store.close() {
                warn!(%namespace, %e, "closing function cache failed");
            }
        }
    }
}
