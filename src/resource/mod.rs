// src/resource/mod.rs
//! Elastic compute resource management
//!
//! - **registry**: compute resource records and the in-memory table
//! - **scaling**: scaling policy and the pure decision evaluator
//! - **provisioner**: seam for bringing elastic resources up and down
//! - **manager**: the control loop and batch load balancer tying it together

pub mod manager;
pub mod provisioner;
pub mod registry;
pub mod scaling;

pub use manager::{ResourceManager, ResourceStats, ResourceSubscription};
pub use provisioner::{ProvisionedResource, Provisioner, SimulatedProvisioner};
pub use registry::{
    ComputeResource, ResourceEvent, ResourceRegistry, ResourceSpec, ResourceStatus, ResourceType,
};
pub use scaling::{evaluate, ScalingContext, ScalingDecision, ScalingPolicy};
