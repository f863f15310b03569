// src/resource/registry.rs
//! Compute resource records and the in-memory registry
//!
//! The registry is the single serialization point for resource mutations;
//! readers get cloned snapshots and may observe slightly stale state, which
//! the scaling loop tolerates by re-reading before every action.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of compute resource backing simulation work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// Seeded at construction; never removed by auto-scaling
    LocalWorker,
    CloudFunction,
    Container,
}

impl ResourceType {
    /// Elastic resources are the auto-scaling candidates
    pub fn is_elastic(&self) -> bool {
        !matches!(self, ResourceType::LocalWorker)
    }
}

/// Resource lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Idle,
    Busy,
    Provisioning,
    /// Unrecoverable; excluded from utilization and dispatch until removed
    Error,
}

/// One compute resource record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeResource {
    pub id: String,
    pub resource_type: ResourceType,
    pub status: ResourceStatus,
    /// Nominal parallel capacity (simulation jobs)
    pub capacity: f64,
    /// Load may transiently exceed capacity under overcommit
    pub current_load: f64,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ComputeResource {
    pub fn new(resource_type: ResourceType, capacity: f64) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            resource_type,
            status: ResourceStatus::Idle,
            capacity: capacity.max(0.0),
            current_load: 0.0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Load fraction for reporting, clamped to [0, 1] even under overcommit
    pub fn utilization(&self) -> f64 {
        if self.capacity <= 0.0 {
            return 0.0;
        }
        (self.current_load / self.capacity).clamp(0.0, 1.0)
    }

    /// Error'd resources no longer count toward capacity
    pub fn is_active(&self) -> bool {
        self.status != ResourceStatus::Error
    }
}

/// Caller-supplied spec for `add_resource`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub resource_type: ResourceType,
    pub capacity: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Registry change notification delivered to typed observers
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Added {
        id: String,
        resource_type: ResourceType,
    },
    Removed {
        id: String,
    },
}

/// Aggregate counters over the registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
}

/// In-memory resource table; insertion order is preserved so scale-down can
/// pick the most recently added idle elastic resource
pub struct ResourceRegistry {
    resources: Mutex<Vec<ComputeResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, resource: ComputeResource) {
        self.resources.lock().push(resource);
    }

    pub fn remove(&self, id: &str) -> Option<ComputeResource> {
        let mut resources = self.resources.lock();
        let index = resources.iter().position(|r| r.id == id)?;
        Some(resources.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<ComputeResource> {
        self.resources.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Update status (and optionally load); `false` for unknown ids
    pub fn update_status(&self, id: &str, status: ResourceStatus, load: Option<f64>) -> bool {
        let mut resources = self.resources.lock();
        let Some(resource) = resources.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        resource.status = status;
        if let Some(load) = load {
            resource.current_load = load.max(0.0);
        }
        true
    }

    pub fn snapshot(&self) -> Vec<ComputeResource> {
        self.resources.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    pub fn clear(&self) -> Vec<ComputeResource> {
        std::mem::take(&mut *self.resources.lock())
    }

    /// Aggregate utilization = Σ load / Σ capacity over active resources,
    /// clamped to [0, 1]; 0 when no active capacity exists
    pub fn utilization(&self) -> f64 {
        let resources = self.resources.lock();
        let (load, capacity) = resources
            .iter()
            .filter(|r| r.is_active())
            .fold((0.0, 0.0), |(l, c), r| (l + r.current_load, c + r.capacity));
        if capacity <= 0.0 {
            return 0.0;
        }
        (load / capacity).clamp(0.0, 1.0)
    }

    /// Spare capacity across idle resources
    pub fn idle_capacity(&self) -> f64 {
        self.resources
            .lock()
            .iter()
            .filter(|r| r.status == ResourceStatus::Idle)
            .map(|r| (r.capacity - r.current_load).max(0.0))
            .sum()
    }

    pub fn counts(&self) -> RegistryCounts {
        let resources = self.resources.lock();
        RegistryCounts {
            total: resources.len(),
            active: resources.iter().filter(|r| r.is_active()).count(),
            idle: resources
                .iter()
                .filter(|r| r.status == ResourceStatus::Idle)
                .count(),
            busy: resources
                .iter()
                .filter(|r| r.status == ResourceStatus::Busy)
                .count(),
        }
    }

    /// Atomically claim every idle resource for dispatch: all idle records
    /// flip to `Busy` in one critical section and their pre-claim clones are
    /// returned, so two concurrent dispatchers can never grab the same one.
    pub fn claim_idle(&self) -> Vec<ComputeResource> {
        let mut resources = self.resources.lock();
        let mut claimed = Vec::new();
        for resource in resources.iter_mut() {
            if resource.status == ResourceStatus::Idle {
                claimed.push(resource.clone());
                resource.status = ResourceStatus::Busy;
            }
        }
        claimed
    }

    /// Return a claimed resource to `Idle` with its load reset. Only a
    /// `Busy` record transitions: a resource that failed (or was removed)
    /// mid-dispatch keeps its state. Returns whether a transition happened.
    pub fn release_busy(&self, id: &str) -> bool {
        let mut resources = self.resources.lock();
        let Some(resource) = resources
            .iter_mut()
            .find(|r| r.id == id && r.status == ResourceStatus::Busy)
        else {
            return false;
        };
        resource.status = ResourceStatus::Idle;
        resource.current_load = 0.0;
        true
    }

    /// Most recently added idle elastic resource, if any
    pub fn newest_idle_elastic(&self) -> Option<ComputeResource> {
        self.resources
            .lock()
            .iter()
            .rev()
            .find(|r| r.status == ResourceStatus::Idle && r.resource_type.is_elastic())
            .cloned()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
