//! Entropy Engine
//!
//! Cached, multi-backend evaluation of Shannon entropy and mutual
//! information for stochastic gene-expression models. Results are computed
//! by an in-process (optionally parallel) series evaluator or an external
//! numeric tool, memoized in persistent size-bounded per-function caches,
//! and escalated to higher precision automatically when a backend fails to
//! converge.
//!
//! # Example
//!
//! ```no_run
//! use entropy_engine::{api, Engine, EngineConfig, Method, Outcome};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::default())?;
//!     match api::h_external(&engine, 0.1, 0.5, 100.0, None, 15, &Method::default_chain())? {
//!         Outcome::Ready(Some(h)) => println!("H = {h}"),
//!         Outcome::Ready(None) => println!("every method exhausted"),
//!         Outcome::Pending(_) => println!("still computing"),
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod dispatch;
pub mod engine;

// Re-exports for convenience
pub use dispatch::{Method, Outcome};
pub use engine::Engine;
pub use entropy_engine_core::config::{EngineConfig, EvictionPolicy};
pub use entropy_engine_core::error::{EngineError, EngineResult};
pub use entropy_engine_core::kernel::{bindings, Bindings, FunctionSpec, SeriesKernel};
pub use entropy_engine_core::pending::{PendingCompute, PendingValue};
pub use entropy_engine_storage::{export_store, import_store, CacheValue, FunctionStore};
