// src/lib.rs
//! Matchsim Simulation Engine Library
//!
//! Runs large numbers of Monte Carlo trials against sports-game state
//! models under real operating constraints: bounded CPU parallelism,
//! elastic scaling across heterogeneous compute resources, per-job
//! cancellation and timeouts, and batch load-balancing under backpressure.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **executor**: the simulation execution engine, a bounded worker pool
//!   with progress, cancellation, and timeout semantics
//! - **resource**: the elastic compute resource manager covering the
//!   registry, the auto-scaling control loop, and batch distribution
//! - **model**: scenarios, progress, results, and batches
//! - **observability**: tracing and metrics bootstrap for hosts
//! - **utils**: configuration and error types
//!
//! # Ownership
//!
//! The resource manager exclusively owns the compute resource registry; the
//! execution engine exclusively owns the progress table and the worker
//! pool. Neither structure is reachable except through its owner's API.
//!
//! ```text
//! caller ──► SimulationEngine::run_simulation ──► worker slot ──► runner
//!        ──► SimulationEngine::run_batch_simulations
//!        ──► ResourceManager::distribute_batch
//!                 │ partitions scenarios across IDLE resources
//!                 └──► SimulationEngine per partition
//!
//! ResourceManager::scale_compute_resources runs independently,
//! triggered by observed queue depth; it never blocks dispatch.
//! ```

// Public module exports
pub mod executor;
pub mod model;
pub mod observability;
pub mod resource;
pub mod utils;

// Re-export commonly used types
pub use executor::engine::{EngineStats, SimulationEngine};
pub use executor::progress::SubscriptionId;
pub use executor::worker::{MonteCarloRunner, ScenarioRunner};
pub use model::{
    BatchStatus, SimulationBatch, SimulationOptions, SimulationProgress, SimulationResult,
    SimulationScenario, SimulationStatus,
};
pub use resource::manager::{ResourceManager, ResourceStats};
pub use resource::registry::{ComputeResource, ResourceEvent, ResourceStatus, ResourceType};
pub use resource::scaling::{ScalingDecision, ScalingPolicy};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
