//! Entropy Engine Storage Library
//!
//! Persistent, size-bounded result caches for the entropy engine. Each
//! cached function gets its own RocksDB directory keyed by the function's
//! content-hashed namespace; entries map canonical argument keys to computed
//! values (or a no-result sentinel) and are evicted LRU or LFU once the
//! store outgrows its byte limit. Stores can be exported to checksummed
//! files and merged on another machine.

pub mod error;
pub mod export;
pub mod registry;
pub mod store;
pub mod value;

// Re-exports for convenience
pub use error::{StoreError, StoreResult};
pub use export::{export_store, import_store};
pub use registry::StoreRegistry;
pub use store::FunctionStore;
pub use value::CacheValue;
