//! Per-function RocksDB-backed result cache.
//!
//! Each cached function owns a database directory named after its namespace
//! (`<name>.<4-hex-digit content hash>`), so a change to the function's
//! definition retires the old cache instead of poisoning it.
//!
//! # Column Families
//! - `entries`: serialized cache key → serialized [`CacheValue`]
//! - `access`: serialized cache key → access stamp, driving eviction
//!
//! # Thread Safety
//! RocksDB's `DB` type is internally thread-safe for concurrent reads and
//! writes. The store can be shared across threads via `Arc<FunctionStore>`;
//! the byte footprint is kept under a mutex so concurrent writers agree on
//! when to evict.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rocksdb::{ColumnFamily, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use entropy_engine_core::config::EvictionPolicy;
use entropy_engine_core::normalize::CacheKey;

use crate::error::{StoreError, StoreResult};
use crate::value::CacheValue;

/// Column family names.
pub mod cf_names {
    /// Cached values.
    pub const ENTRIES: &str = "entries";
    /// Access stamps for eviction.
    pub const ACCESS: &str = "access";
}

/// Per-entry access bookkeeping, stored alongside the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessStamp {
    /// Last read or write, microseconds since the Unix epoch.
    last_access_us: i64,
    /// Lifetime hit count.
    hits: u64,
    /// Size of the serialized key plus value in the entries family.
    entry_bytes: u64,
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Size-bounded persistent cache for one function.
pub struct FunctionStore {
    namespace: String,
    db: DB,
    size_limit: u64,
    policy: EvictionPolicy,
    /// Serialized bytes currently held in the entries family.
    footprint: Mutex<u64>,
    closed: AtomicBool,
}

impl FunctionStore {
    /// Open (or create) the cache for `namespace` under `root`.
    pub fn open(
        root: &Path,
        namespace: &str,
        size_limit: u64,
        policy: EvictionPolicy,
    ) -> StoreResult<Self> {
        let path = root.join(namespace);
        let path_str = path.to_string_lossy().to_string();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, &path, [cf_names::ENTRIES, cf_names::ACCESS]).map_err(
            |e| StoreError::OpenFailed {
                path: path_str.clone(),
                message: e.to_string(),
            },
        )?;

        let store = Self {
            namespace: namespace.to_string(),
            db,
            size_limit,
            policy,
            footprint: Mutex::new(0),
            closed: AtomicBool::new(false),
        };
        let footprint = store.scan_footprint()?;
        *store.footprint.lock() = footprint;
        debug!(namespace, footprint, path = %path_str, "opened function cache");
        Ok(store)
    }

    /// The function namespace this store serves.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound {
                name: name.to_string(),
            })
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed(self.namespace.clone()));
        }
        Ok(())
    }

    /// Sum of serialized entry sizes, computed once at open.
    fn scan_footprint(&self) -> StoreResult<u64> {
        let cf = self.cf(cf_names::ENTRIES)?;
        let mut total = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
            total += (key.len() + value.len()) as u64;
        }
        Ok(total)
    }

    /// Look up a cached value; a hit refreshes the access stamp.
    pub fn get(&self, key: &CacheKey) -> StoreResult<CacheValue> {
        self.check_open()?;
        let key_bytes = bincode::serialize(key)?;
        let cf = self.cf(cf_names::ENTRIES)?;
        let value_bytes = self
            .db
            .get_cf(cf, &key_bytes)
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
            .ok_or_else(|| StoreError::Miss {
                key: key.to_string(),
            })?;
        let value: CacheValue = bincode::deserialize(&value_bytes)?;
        self.touch(&key_bytes, (key_bytes.len() + value_bytes.len()) as u64)?;
        Ok(value)
    }

    /// Insert or replace a cached value, then evict down to the size limit.
    pub fn set(&self, key: &CacheKey, value: CacheValue) -> StoreResult<()> {
        self.check_open()?;
        let key_bytes = bincode::serialize(key)?;
        let value_bytes = bincode::serialize(&value)?;
        let entry_bytes = (key_bytes.len() + value_bytes.len()) as u64;

        if entry_bytes > self.size_limit {
            return Err(StoreError::WriteFailed(format!(
                "entry of {entry_bytes} bytes exceeds the {} byte cache limit",
                self.size_limit
            )));
        }

        let entries = self.cf(cf_names::ENTRIES)?;
        let access = self.cf(cf_names::ACCESS)?;

        // Replacements give back the old entry's bytes.
        let old_bytes = self
            .db
            .get_cf(entries, &key_bytes)
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
            .map(|old| (key_bytes.len() + old.len()) as u64);

        let stamp = AccessStamp {
            last_access_us: now_micros(),
            hits: 1,
            entry_bytes,
        };
        self.db
            .put_cf(entries, &key_bytes, &value_bytes)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.db
            .put_cf(access, &key_bytes, bincode::serialize(&stamp)?)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        {
            let mut footprint = self.footprint.lock();
            *footprint = footprint.saturating_sub(old_bytes.unwrap_or(0)) + entry_bytes;
        }
        self.evict_to_limit(&key_bytes)?;
        Ok(())
    }

    /// Refresh the access stamp after a hit.
    fn touch(&self, key_bytes: &[u8], entry_bytes: u64) -> StoreResult<()> {
        let access = self.cf(cf_names::ACCESS)?;
        let stamp = match self
            .db
            .get_cf(access, key_bytes)
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
        {
            Some(bytes) => {
                let mut stamp: AccessStamp = bincode::deserialize(&bytes)?;
                stamp.last_access_us = now_micros();
                stamp.hits += 1;
                stamp
            }
            // Stamp lost (e.g. an interrupted write); rebuild it.
            None => AccessStamp {
                last_access_us: now_micros(),
                hits: 1,
                entry_bytes,
            },
        };
        self.db
            .put_cf(access, key_bytes, bincode::serialize(&stamp)?)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Evict entries until the footprint fits the limit. The entry at
    /// `protect` (the one just written) is never chosen.
    fn evict_to_limit(&self, protect: &[u8]) -> StoreResult<()> {
        loop {
            if *self.footprint.lock() <= self.size_limit {
                return Ok(());
            }
            let victim = self.pick_victim(protect)?;
            let Some((key_bytes, stamp)) = victim else {
                // Nothing evictable; the protected entry alone fits by the
                // check in `set`.
                return Ok(());
            };
            debug!(
                namespace = %self.namespace,
                bytes = stamp.entry_bytes,
                hits = stamp.hits,
                "evicting cache entry"
            );
            let entries = self.cf(cf_names::ENTRIES)?;
            let access = self.cf(cf_names::ACCESS)?;
            self.db
                .delete_cf(entries, &key_bytes)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            self.db
                .delete_cf(access, &key_bytes)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            let mut footprint = self.footprint.lock();
            *footprint = footprint.saturating_sub(stamp.entry_bytes);
        }
    }

    /// The next eviction victim under the configured policy.
    fn pick_victim(&self, protect: &[u8]) -> StoreResult<Option<(Vec<u8>, AccessStamp)>> {
        let access = self.cf(cf_names::ACCESS)?;
        let mut victim: Option<(Vec<u8>, AccessStamp)> = None;
        for item in self.db.iterator_cf(access, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
            if key.as_ref() == protect {
                continue;
            }
            let stamp: AccessStamp = bincode::deserialize(&value)?;
            let better = match &victim {
                None => true,
                Some((_, current)) => match self.policy {
                    EvictionPolicy::LeastRecentlyUsed => {
                        stamp.last_access_us < current.last_access_us
                    }
                    EvictionPolicy::LeastFrequentlyUsed => {
                        (stamp.hits, stamp.last_access_us)
                            < (current.hits, current.last_access_us)
                    }
                },
            };
            if better {
                victim = Some((key.to_vec(), stamp));
            }
        }
        Ok(victim)
    }

    /// All cached (key, value) pairs, for export.
    pub fn entries(&self) -> StoreResult<Vec<(CacheKey, CacheValue)>> {
        self.check_open()?;
        let cf = self.cf(cf_names::ENTRIES)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
            out.push((bincode::deserialize(&key)?, bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Number of cached entries.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Current serialized byte footprint.
    pub fn footprint(&self) -> u64 {
        *self.footprint.lock()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.check_open()?;
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))
    }

    /// Flush and mark the store closed. Idempotent; later operations fail
    /// with [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(namespace = %self.namespace, "closing function cache");
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))
    }
}

impl Drop for FunctionStore {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.db.flush() {
                warn!(namespace = %self.namespace, %e, "flush on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entropy_engine_core::normalize::ArgValue;
    use tempfile::TempDir;

    fn key(n: i64) -> CacheKey {
        CacheKey::from_bindings(&[("N", ArgValue::Int(n))], Some(15))
    }

    fn open(dir: &TempDir, limit: u64, policy: EvictionPolicy) -> FunctionStore {
        FunctionStore::open(dir.path(), "H_external.1a2b", limit, policy).unwrap()
    }

    #[test]
    fn set_then_get() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);

        store.set(&key(8), CacheValue::Number(2.5)).unwrap();
        assert_eq!(store.get(&key(8)).unwrap(), CacheValue::Number(2.5));
        assert!(matches!(
            store.get(&key(9)),
            Err(StoreError::Miss { .. })
        ));
    }

    #[test]
    fn sentinel_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);

        store.set(&key(1), CacheValue::NoResult).unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), CacheValue::NoResult);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);
            store.set(&key(8), CacheValue::Number(2.5)).unwrap();
            store.close().unwrap();
        }
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(store.get(&key(8)).unwrap(), CacheValue::Number(2.5));
        assert!(store.footprint() > 0);
    }

    #[test]
    fn replacement_does_not_grow_footprint() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);

        store.set(&key(1), CacheValue::Number(1.0)).unwrap();
        let first = store.footprint();
        store.set(&key(1), CacheValue::Number(2.0)).unwrap();
        assert_eq!(store.footprint(), first);
    }

    #[test]
    fn lru_evicts_the_stalest_entry() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);

        store.set(&key(1), CacheValue::Number(1.0)).unwrap();
        let entry_bytes = store.footprint();
        store.set(&key(2), CacheValue::Number(2.0)).unwrap();

        // Touch entry 1 so entry 2 becomes the LRU victim.
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.get(&key(1)).unwrap();

        // Shrink the limit by reopening is overkill; drive eviction directly
        // with a store whose limit only fits two entries.
        drop(store);
        let limit = entry_bytes * 2;
        let store = open(&dir, limit, EvictionPolicy::LeastRecentlyUsed);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.get(&key(1)).unwrap();
        store.set(&key(3), CacheValue::Number(3.0)).unwrap();

        assert!(store.get(&key(1)).is_ok());
        assert!(store.get(&key(3)).is_ok());
        assert!(matches!(store.get(&key(2)), Err(StoreError::Miss { .. })));
        assert!(store.footprint() <= limit);
    }

    #[test]
    fn lfu_evicts_the_coldest_entry() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastFrequentlyUsed);

        store.set(&key(1), CacheValue::Number(1.0)).unwrap();
        let entry_bytes = store.footprint();
        store.set(&key(2), CacheValue::Number(2.0)).unwrap();
        for _ in 0..5 {
            store.get(&key(2)).unwrap();
        }

        drop(store);
        let store = open(
            &dir,
            entry_bytes * 2,
            EvictionPolicy::LeastFrequentlyUsed,
        );
        for _ in 0..5 {
            store.get(&key(2)).unwrap();
        }
        store.set(&key(3), CacheValue::Number(3.0)).unwrap();

        assert!(store.get(&key(2)).is_ok());
        assert!(store.get(&key(3)).is_ok());
        assert!(matches!(store.get(&key(1)), Err(StoreError::Miss { .. })));
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 8, EvictionPolicy::LeastRecentlyUsed);
        assert!(matches!(
            store.set(&key(1), CacheValue::Number(1.0)),
            Err(StoreError::WriteFailed(_))
        ));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, 1_000_000, EvictionPolicy::LeastRecentlyUsed);
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(&key(1)), Err(StoreError::Closed(_))));
        assert!(matches!(
            store.set(&key(1), CacheValue::Number(1.0)),
            Err(StoreError::Closed(_))
        ));
    }
}
