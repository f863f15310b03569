// src/executor/mod.rs
//! Simulation job execution
//!
//! - **engine**: bounded-concurrency job dispatch with progress,
//!   cancellation, and timeout semantics
//! - **worker**: the `ScenarioRunner` seam and the default Monte Carlo
//!   sampler, speaking a tagged message union over per-job channels
//! - **slots**: priority-aware bounded worker slots (backpressure)
//! - **progress**: in-flight progress table and typed observers

pub mod engine;
pub mod progress;
pub mod slots;
pub mod worker;

pub use engine::{EngineStats, SimulationEngine};
pub use progress::{ProgressTracker, SubscriptionId};
pub use slots::{SlotPermit, WorkerSlots};
pub use worker::{JobContext, MonteCarloRunner, ScenarioRunner, WorkerMessage};
