//! Computation backends: the in-process (optionally parallel) summation
//! evaluator and the external-tool subprocess evaluator.

pub mod external;
pub mod parallel;

pub use external::SubprocessBackend;
pub use parallel::ParallelSumBackend;
