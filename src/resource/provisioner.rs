// src/resource/provisioner.rs
//! Provisioning seam for elastic compute resources
//!
//! The manager never talks to a cloud API directly; it asks a
//! [`Provisioner`] to bring a resource up or tear it down. The default
//! [`SimulatedProvisioner`] models startup latency and is enough for local
//! fleets and tests; hosts running real cloud functions or containers
//! supply their own implementation.

use crate::resource::registry::{ComputeResource, ResourceType};
use crate::resource::scaling::ELASTIC_RESOURCE_CAPACITY;
use crate::utils::errors::{EngineError, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Description of a successfully provisioned resource
#[derive(Debug, Clone)]
pub struct ProvisionedResource {
    pub resource_type: ResourceType,
    pub capacity: f64,
    pub metadata: HashMap<String, String>,
}

/// Brings elastic resources up and down
pub trait Provisioner: Send + Sync {
    fn provision(&self, resource_type: ResourceType)
        -> BoxFuture<'_, Result<ProvisionedResource>>;

    fn teardown(&self, resource: &ComputeResource) -> BoxFuture<'_, Result<()>>;
}

/// In-process provisioner with configurable latency and failure injection
pub struct SimulatedProvisioner {
    capacity: f64,
    startup_delay: Duration,
    fail_next: AtomicBool,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self {
            capacity: ELASTIC_RESOURCE_CAPACITY,
            startup_delay: Duration::from_millis(10),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Make the next `provision` call fail (test hook)
    pub fn fail_next_provision(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner for SimulatedProvisioner {
    fn provision(
        &self,
        resource_type: ResourceType,
    ) -> BoxFuture<'_, Result<ProvisionedResource>> {
        Box::pin(async move {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Provisioning(format!(
                    "simulated provision failure for {:?}",
                    resource_type
                )));
            }
            tokio::time::sleep(self.startup_delay).await;
            debug!(?resource_type, capacity = self.capacity, "Provisioned elastic resource");
            Ok(ProvisionedResource {
                resource_type,
                capacity: self.capacity,
                metadata: HashMap::from([("provisioner".to_string(), "simulated".to_string())]),
            })
        })
    }

    fn teardown(&self, resource: &ComputeResource) -> BoxFuture<'_, Result<()>> {
        let id = resource.id.clone();
        Box::pin(async move {
            debug!(resource_id = %id, "Tearing down elastic resource");
            Ok(())
        })
    }
}
