//! Entropy Engine Core Library
//!
//! Domain types and computation machinery for the entropy computation
//! engine: argument normalization and cache keys, series kernels for the
//! gene-expression entropy distributions, the in-process parallel summation
//! backend, the external-tool subprocess backend, and pending-result
//! handles for asynchronous computations.
//!
//! # Architecture
//!
//! This crate defines:
//! - Argument normalization and canonical cache keys (`normalize`)
//! - Series kernels and the closed-form distribution math (`kernel`, `series`)
//! - Computation backends (`backend::parallel`, `backend::external`)
//! - The shared worker pool (`pool`)
//! - Pending-result handles and the in-flight tracker (`pending`)
//! - Error types, result aliases and configuration (`error`, `config`)
//!
//! Persistence lives in `entropy-engine-storage`; the dispatch state machine
//! and the public evaluation API live in the `entropy-engine` facade crate.
//!
//! # Example
//!
//! ```
//! use entropy_engine_core::normalize::{ArgValue, CacheKey};
//!
//! // Equivalent bindings normalize to the same key regardless of order.
//! let a = CacheKey::from_bindings(
//!     &[("N", ArgValue::Float(8.0)), ("epsilon", ArgValue::Float(2.0))],
//!     Some(15),
//! );
//! let b = CacheKey::from_bindings(
//!     &[("epsilon", ArgValue::Float(2.0)), ("N", ArgValue::Int(8))],
//!     Some(15),
//! );
//! assert_eq!(a, b);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod kernel;
pub mod normalize;
pub mod pending;
pub mod points;
pub mod pool;
pub mod series;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use kernel::{Bindings, FunctionSpec, SeriesKernel};
pub use normalize::{ArgValue, CacheKey, NormalizedValue};
pub use pending::{PendingCompute, PendingTracker, PendingValue};
