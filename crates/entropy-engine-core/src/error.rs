//! Engine error types.
//!
//! The taxonomy separates failures the dispatcher recovers from locally
//! (retryable numeric failures, subprocess timeouts) from hard configuration
//! errors that must surface immediately.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the computation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration, detected at startup. Never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid argument passed to a helper.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Numeric failure that precision escalation may recover from:
    /// a not-a-number result, a zero partial sum or a convergence failure.
    #[error("retryable numeric failure: {0}")]
    Retryable(String),

    /// External tool exceeded its wall-clock budget. The process group has
    /// already been killed when this is returned; the dispatcher treats it
    /// like a not-a-number result.
    #[error("external tool timed out after {0:?}")]
    Timeout(Duration),

    /// External tool binary could not be launched.
    #[error("failed to launch external tool '{tool}': {message}")]
    Spawn { tool: String, message: String },

    /// External tool wrote something that does not parse as a number.
    /// A hard error: either the tool or its invocation is misconfigured.
    #[error("unparsable external tool output: {0:?}")]
    MalformedOutput(String),

    /// A pending handle was queried before its computation finished.
    #[error("result is not ready")]
    NotReady,

    /// An asynchronous computation finished with an error.
    #[error("computation failed: {0}")]
    Failed(String),

    /// Worker pool construction failed.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent store failure, forwarded from the storage layer.
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether the dispatcher may retry this failure at higher precision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Retryable(_) | EngineError::Timeout(_))
    }
}

/// Convenient Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
