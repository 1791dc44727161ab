//! Storage error types.
//!
//! Errors are designed for fail-fast debugging with descriptive messages.

use thiserror::Error;

/// Cache storage operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database failed to open at the specified path.
    #[error("failed to open cache at '{path}': {message}")]
    OpenFailed {
        /// The path where the open was attempted
        path: String,
        /// The underlying error message from RocksDB
        message: String,
    },

    /// Column family not found in the database.
    #[error("column family '{name}' not found")]
    ColumnFamilyNotFound {
        /// Name of the missing column family
        name: String,
    },

    /// No cached value for the key.
    #[error("cache miss: {key}")]
    Miss {
        /// Display form of the missed cache key
        key: String,
    },

    /// Read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// Write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Flush operation failed.
    #[error("flush failed: {0}")]
    FlushFailed(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Export file could not be written.
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Import file was unreadable or corrupt.
    #[error("import failed: {0}")]
    ImportFailed(String),

    /// Operation on a store that has already been closed.
    #[error("store '{0}' is closed")]
    Closed(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::ReadFailed(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
