//! Portable cache export and import.
//!
//! Caches are expensive to fill (single entries can take hours of external
//! tool time), so a store can be dumped to a single checksummed file and
//! merged into a cache on another machine.
//!
//! File format:
//! - Header: magic bytes `ENTC`, version u8, created-at i64 (micros), entry count u64
//! - Entries: bincode-serialized `Vec<(CacheKey, CacheValue)>`
//! - Footer: xxhash64 checksum of all preceding bytes

use std::path::Path;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::store::FunctionStore;
use crate::value::CacheValue;

use entropy_engine_core::normalize::CacheKey;

/// Magic bytes identifying an entropy cache export.
pub const EXPORT_MAGIC: [u8; 4] = *b"ENTC";
/// Current export format version.
pub const EXPORT_VERSION: u8 = 1;

/// Write every entry of `store` to `path` atomically.
pub fn export_store(store: &FunctionStore, path: &Path) -> StoreResult<()> {
    let entries = store.entries()?;
    let count = entries.len() as u64;

    let mut data = Vec::new();
    data.extend_from_slice(&EXPORT_MAGIC);
    data.push(EXPORT_VERSION);
    data.extend_from_slice(&chrono::Utc::now().timestamp_micros().to_le_bytes());
    data.extend_from_slice(&count.to_le_bytes());
    data.extend_from_slice(&bincode::serialize(&entries)?);

    let checksum = xxhash_rust::xxh64::xxh64(&data, 0);
    data.extend_from_slice(&checksum.to_le_bytes());

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, &data)
        .map_err(|e| StoreError::ExportFailed(format!("write failed: {e}")))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| StoreError::ExportFailed(format!("rename failed: {e}")))?;

    info!(namespace = %store.namespace(), count, path = %path.display(), "exported cache");
    Ok(())
}

/// Read an export file and merge its entries into `store`. Existing keys are
/// overwritten. Returns the number of imported entries.
pub fn import_store(store: &FunctionStore, path: &Path) -> StoreResult<usize> {
    let data = std::fs::read(path)
        .map_err(|e| StoreError::ImportFailed(format!("read failed: {e}")))?;

    // 4 magic + 1 version + 8 timestamp + 8 count + 8 checksum
    if data.len() < 29 {
        return Err(StoreError::ImportFailed("file too short".into()));
    }
    let (body, footer) = data.split_at(data.len() - 8);
    let mut checksum_bytes = [0u8; 8];
    checksum_bytes.copy_from_slice(footer);
    if xxhash_rust::xxh64::xxh64(body, 0) != u64::from_le_bytes(checksum_bytes) {
        return Err(StoreError::ImportFailed("checksum mismatch".into()));
    }

    if body[..4] != EXPORT_MAGIC {
        return Err(StoreError::ImportFailed("bad magic bytes".into()));
    }
    if body[4] != EXPORT_VERSION {
        return Err(StoreError::ImportFailed(format!(
            "unsupported version {}",
            body[4]
        )));
    }
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&body[13..21]);
    let count = u64::from_le_bytes(count_bytes);

    let entries: Vec<(CacheKey, CacheValue)> = bincode::deserialize(&body[21..])?;
    if entries.len() as u64 != count {
        return Err(StoreError::ImportFailed(format!(
            "header promised {count} entries, file holds {}",
            entries.len()
        )));
    }

    for (key, value) in &entries {
        store.set(key, *value)?;
    }
    info!(namespace = %store.namespace(), count, path = %path.display(), "imported cache");
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entropy_engine_core::config::EvictionPolicy;
    use entropy_engine_core::normalize::ArgValue;
    use tempfile::TempDir;

    fn key(n: i64) -> CacheKey {
        CacheKey::from_bindings(&[("N", ArgValue::Int(n))], Some(15))
    }

    fn open(dir: &TempDir, name: &str) -> FunctionStore {
        FunctionStore::open(dir.path(), name, 1_000_000, EvictionPolicy::LeastRecentlyUsed)
            .unwrap()
    }

    #[test]
    fn export_and_import_between_stores() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "H_external.1a2b");
        source.set(&key(1), CacheValue::Number(1.5)).unwrap();
        source.set(&key(2), CacheValue::NoResult).unwrap();

        let file = dir.path().join("dump.entc");
        export_store(&source, &file).unwrap();

        let target = open(&dir, "H_external.1a2b-copy");
        assert_eq!(import_store(&target, &file).unwrap(), 2);
        assert_eq!(target.get(&key(1)).unwrap(), CacheValue::Number(1.5));
        assert_eq!(target.get(&key(2)).unwrap(), CacheValue::NoResult);
    }

    #[test]
    fn corrupted_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "H_external.1a2b");
        source.set(&key(1), CacheValue::Number(1.5)).unwrap();

        let file = dir.path().join("dump.entc");
        export_store(&source, &file).unwrap();

        let mut data = std::fs::read(&file).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0xff;
        std::fs::write(&file, &data).unwrap();

        let target = open(&dir, "H_external.1a2b-copy");
        assert!(matches!(
            import_store(&target, &file),
            Err(StoreError::ImportFailed(_))
        ));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dump.entc");
        std::fs::write(&file, b"ENTC").unwrap();
        let target = open(&dir, "H_external.1a2b");
        assert!(matches!(
            import_store(&target, &file),
            Err(StoreError::ImportFailed(_))
        ));
    }
}
