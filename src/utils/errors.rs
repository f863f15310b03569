// src/utils/errors.rs
//! Error types for the simulation engine and resource manager
//!
//! Every fallible public operation returns [`Result`]. Per-job failures
//! (validation, worker errors, timeouts, cancellation) reject exactly the
//! future for that job; scaling-loop and cleanup failures are logged by the
//! owning component and never surface here.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the simulation engine and resource manager
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed scenario rejected before dispatch (no side effects)
    #[error("invalid scenario: {0}")]
    Validation(String),

    /// Worker-reported failure during simulation execution
    #[error("simulation '{scenario_id}' failed: {message}")]
    WorkerExecution {
        scenario_id: String,
        message: String,
    },

    /// Hard deadline exceeded; the worker was forcibly terminated
    #[error("simulation '{scenario_id}' timed out after {timeout_ms}ms")]
    Timeout {
        scenario_id: String,
        timeout_ms: u64,
    },

    /// Job terminated via `cancel_simulation`
    #[error("simulation '{scenario_id}' was cancelled")]
    Cancelled { scenario_id: String },

    /// `distribute_batch` found no idle compute resource
    #[error("No available compute resources")]
    NoAvailableResources,

    /// Elastic resource provisioning failed (logged, non-fatal to the loop)
    #[error("failed to provision compute resource: {0}")]
    Provisioning(String),

    /// Worker slot accounting broke down (closed semaphore)
    #[error("worker pool exhausted or shut down")]
    PoolExhausted,

    /// Configuration could not be loaded or validated
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal runtime failure (channel closed, join error)
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EngineError {
    /// Whether this error is a terminal per-job outcome (as opposed to an
    /// engine-level fault)
    pub fn is_job_outcome(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::WorkerExecution { .. }
                | EngineError::Timeout { .. }
                | EngineError::Cancelled { .. }
        )
    }
}
