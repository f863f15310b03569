// src/model/mod.rs
//! Core data model for Monte Carlo simulation work
//!
//! Scenarios are built by an external collaborator and consumed read-only
//! here; results are immutable and owned by the caller once returned. The
//! engine keeps only ephemeral tracking state (tasks, progress) between
//! dispatch and a terminal outcome.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on iterations for a single scenario
pub const MAX_ITERATIONS: u32 = 1_000_000;

/// A unit of simulation work: an iteration count plus an opaque
/// variable/constraint/game-state payload interpreted by the runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationScenario {
    /// Unique scenario id
    pub id: String,

    /// Number of Monte Carlo trials to run (1..=1,000,000)
    pub iterations: u32,

    /// Random-variable distributions (opaque to the engine)
    #[serde(default)]
    pub variables: serde_json::Value,

    /// Constraints between variables (opaque to the engine)
    #[serde(default)]
    pub constraints: serde_json::Value,

    /// Game state snapshot the trials sample against (opaque)
    #[serde(default)]
    pub game_state: serde_json::Value,
}

impl SimulationScenario {
    /// Minimal scenario with empty payloads, used by hosts and tests
    pub fn new(id: impl Into<String>, iterations: u32) -> Self {
        Self {
            id: id.into(),
            iterations,
            variables: serde_json::Value::Null,
            constraints: serde_json::Value::Null,
            game_state: serde_json::Value::Null,
        }
    }

    /// Validate input constraints before any worker is touched
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("scenario id is empty".into()));
        }
        if self.iterations < 1 {
            return Err(EngineError::Validation(format!(
                "scenario '{}': iterations must be >= 1",
                self.id
            )));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(EngineError::Validation(format!(
                "scenario '{}': iterations {} exceeds maximum {}",
                self.id, self.iterations, MAX_ITERATIONS
            )));
        }
        Ok(())
    }
}

/// Ephemeral correlation record created when a scenario is handed to a
/// worker; destroyed on the terminal outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationTask {
    pub task_id: String,
    pub scenario_id: String,
    pub dispatched_at: DateTime<Utc>,
}

impl SimulationTask {
    pub fn new(scenario_id: impl Into<String>) -> Self {
        Self {
            task_id: ulid::Ulid::new().to_string(),
            scenario_id: scenario_id.into(),
            dispatched_at: Utc::now(),
        }
    }
}

/// Lifecycle of an in-flight simulation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Queued,
    Running,
    Cancelling,
}

/// Point-in-time progress of an in-flight job; at most one record exists
/// per scenario id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationProgress {
    pub scenario_id: String,
    pub total_iterations: u32,
    /// Monotonically non-decreasing
    pub completed_iterations: u32,
    pub started_at: DateTime<Utc>,
    pub status: SimulationStatus,
}

impl SimulationProgress {
    pub fn started(scenario_id: impl Into<String>, total_iterations: u32) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            total_iterations,
            completed_iterations: 0,
            started_at: Utc::now(),
            status: SimulationStatus::Queued,
        }
    }

    /// Fraction of trials completed, in [0, 1]
    pub fn fraction_complete(&self) -> f64 {
        if self.total_iterations == 0 {
            return 0.0;
        }
        f64::from(self.completed_iterations) / f64::from(self.total_iterations)
    }
}

/// Confidence interval over sampled outcomes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Confidence level, e.g. 0.95
    pub level: f64,
}

/// A named driver of the outcome distribution with its estimated impact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFactor {
    pub name: String,
    pub impact: f64,
}

/// Immutable result of a completed simulation; owned by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario_id: String,
    pub iterations: u32,
    pub outcomes: Vec<f64>,
    pub confidence_interval: ConfidenceInterval,
    pub key_factors: Vec<KeyFactor>,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Batch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// A caller-defined group of scenarios submitted and distributed together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationBatch {
    pub id: String,
    pub scenarios: Vec<SimulationScenario>,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Inter-batch scheduling hint; higher dispatches first under saturation
    #[serde(default)]
    pub priority: u32,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
}

impl SimulationBatch {
    pub fn new(id: impl Into<String>, scenarios: Vec<SimulationScenario>) -> Self {
        Self {
            id: id.into(),
            scenarios,
            config: serde_json::Value::Null,
            priority: 0,
            created_at: Utc::now(),
            status: BatchStatus::Queued,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Per-call options for `run_simulation` / `run_batch_simulations`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Hard deadline for the job; on expiry the worker is force-terminated
    pub timeout_ms: Option<u64>,
}
