// src/resource/manager.rs
//! Elastic compute resource manager
//!
//! Owns the resource registry, evaluates the auto-scaling control loop, and
//! load-balances simulation batches across idle resources. Scaling never
//! blocks job dispatch: `scale_compute_resources` serializes only against
//! itself and always re-reads fresh registry state before acting, so stats
//! readers may be slightly stale but decisions never are.

use crate::executor::engine::SimulationEngine;
use crate::model::{SimulationBatch, SimulationOptions, SimulationResult, SimulationScenario};
use crate::resource::provisioner::{Provisioner, SimulatedProvisioner};
use crate::resource::registry::{
    ComputeResource, ResourceEvent, ResourceRegistry, ResourceSpec, ResourceStatus, ResourceType,
};
use crate::resource::scaling::{evaluate, ScalingContext, ScalingDecision, ScalingPolicy};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use futures::future::join_all;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handle for unsubscribing a resource event observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceSubscription(u64);

type ResourceCallback = Box<dyn Fn(&ResourceEvent) + Send + Sync>;

/// Point-in-time registry snapshot
#[derive(Debug, Clone, Copy)]
pub struct ResourceStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
    /// Aggregate utilization in [0, 1]
    pub utilization: f64,
    /// Most recent value passed to `scale_compute_resources`
    pub queue_depth: usize,
}

/// Registry owner, scaling loop, and batch load balancer
pub struct ResourceManager {
    engine: Arc<SimulationEngine>,
    policy: ScalingPolicy,
    registry: ResourceRegistry,
    provisioner: Arc<dyn Provisioner>,
    observers: Mutex<HashMap<ResourceSubscription, Arc<ResourceCallback>>>,
    next_subscription: AtomicU64,
    last_scale_action: Mutex<Option<Instant>>,
    queue_depth: AtomicUsize,
    /// Serializes scaling evaluations; dispatch never takes this
    scale_gate: tokio::sync::Mutex<()>,
}

impl ResourceManager {
    /// Build a manager seeded with `policy.min_resources` local workers
    /// sharing the engine's pool capacity
    pub fn new(engine: Arc<SimulationEngine>, config: &EngineConfig) -> Self {
        Self::with_provisioner(engine, config, Arc::new(SimulatedProvisioner::new()))
    }

    pub fn with_provisioner(
        engine: Arc<SimulationEngine>,
        config: &EngineConfig,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let policy = config.scaling.clone();
        let seeds = policy.min_resources.max(1);
        let capacity = (config.runtime.pool_size as f64 / seeds as f64).max(1.0);

        info!(
            seeds,
            capacity,
            min = policy.min_resources,
            max = policy.max_resources,
            "Initializing resource manager"
        );

        let registry = ResourceRegistry::new();
        for _ in 0..seeds {
            registry.insert(ComputeResource::new(ResourceType::LocalWorker, capacity));
        }

        Self {
            engine,
            policy,
            registry,
            provisioner,
            observers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            last_scale_action: Mutex::new(None),
            queue_depth: AtomicUsize::new(0),
            scale_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Register a resource, returning its generated id
    pub fn add_resource(&self, spec: ResourceSpec) -> String {
        let resource =
            ComputeResource::new(spec.resource_type, spec.capacity).with_metadata(spec.metadata);
        let id = resource.id.clone();
        info!(resource_id = %id, resource_type = ?spec.resource_type, "Resource added");
        self.registry.insert(resource);
        self.emit(&ResourceEvent::Added {
            id: id.clone(),
            resource_type: spec.resource_type,
        });
        id
    }

    /// Remove a resource; `false` for unknown ids
    pub fn remove_resource(&self, id: &str) -> bool {
        if self.registry.remove(id).is_none() {
            return false;
        }
        info!(resource_id = %id, "Resource removed");
        self.emit(&ResourceEvent::Removed { id: id.to_string() });
        true
    }

    /// Update status and optionally load; `false` for unknown ids
    pub fn update_resource_status(
        &self,
        id: &str,
        status: ResourceStatus,
        load: Option<f64>,
    ) -> bool {
        self.registry.update_status(id, status, load)
    }

    pub fn get_resource(&self, id: &str) -> Option<ComputeResource> {
        self.registry.get(id)
    }

    pub fn resources(&self) -> Vec<ComputeResource> {
        self.registry.snapshot()
    }

    /// Aggregate utilization over active resources, in [0, 1]
    pub fn current_utilization(&self) -> f64 {
        self.registry.utilization()
    }

    pub fn resource_stats(&self) -> ResourceStats {
        let counts = self.registry.counts();
        ResourceStats {
            total: counts.total,
            active: counts.active,
            idle: counts.idle,
            busy: counts.busy,
            utilization: self.registry.utilization(),
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
        }
    }

    /// Register an observer for resource add/remove events
    pub fn on_resource_event<F>(&self, callback: F) -> ResourceSubscription
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        let id = ResourceSubscription(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().insert(id, Arc::new(Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: ResourceSubscription) -> bool {
        self.observers.lock().remove(&id).is_some()
    }

    fn emit(&self, event: &ResourceEvent) {
        let callbacks: Vec<Arc<ResourceCallback>> =
            self.observers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        match *self.last_scale_action.lock() {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_millis(self.policy.cooldown_ms),
        }
    }

    /// One evaluation of the auto-scaling control loop.
    ///
    /// Never propagates errors; provisioning failures are logged and the
    /// loop proceeds. Seeded local workers are never scaling victims.
    pub async fn scale_compute_resources(&self, queue_depth: usize) {
        self.queue_depth.store(queue_depth, Ordering::SeqCst);
        let _gate = self.scale_gate.lock().await;

        let counts = self.registry.counts();
        let utilization = self.registry.utilization();
        let idle_elastic = self
            .registry
            .snapshot()
            .iter()
            .filter(|r| r.status == ResourceStatus::Idle && r.resource_type.is_elastic())
            .count();
        let ctx = ScalingContext {
            active_resources: counts.active,
            utilization,
            queue_depth,
            idle_capacity: self.registry.idle_capacity(),
            idle_elastic,
            cooldown_elapsed: self.cooldown_elapsed(),
        };
        let decision = evaluate(&self.policy, &ctx);

        info!(
            utilization,
            queue_depth,
            active = counts.active,
            idle = counts.idle,
            busy = counts.busy,
            decision = ?decision,
            "Evaluating scaling decision"
        );
        gauge!("matchsim.resources.utilization").set(utilization);
        gauge!("matchsim.resources.active").set(counts.active as f64);

        match decision {
            ScalingDecision::None => {}
            ScalingDecision::ScaleUp { count, reason } => {
                info!(count, %reason, "Scaling up");
                for _ in 0..count {
                    // Bound against fresh state; another evaluation or an
                    // explicit add may have landed meanwhile
                    if self.registry.counts().active >= self.policy.max_resources {
                        break;
                    }
                    self.provision_elastic().await;
                }
                *self.last_scale_action.lock() = Some(Instant::now());
            }
            ScalingDecision::ScaleDown { count, reason } => {
                info!(count, %reason, "Scaling down");
                for _ in 0..count {
                    if self.registry.counts().active <= self.policy.min_resources {
                        break;
                    }
                    let Some(victim) = self.registry.newest_idle_elastic() else {
                        break;
                    };
                    if self.registry.remove(&victim.id).is_none() {
                        continue;
                    }
                    if let Err(err) = self.provisioner.teardown(&victim).await {
                        warn!(resource_id = %victim.id, error = %err, "Teardown failed");
                    }
                    counter!("matchsim.scaling.down").increment(1);
                    info!(resource_id = %victim.id, "Removed idle elastic resource");
                    self.emit(&ResourceEvent::Removed {
                        id: victim.id.clone(),
                    });
                }
                *self.last_scale_action.lock() = Some(Instant::now());
            }
        }
    }

    /// Provision one elastic resource through the `Provisioning → Idle`
    /// state path; failures are logged and leave no registry residue
    async fn provision_elastic(&self) {
        let mut placeholder = ComputeResource::new(ResourceType::CloudFunction, 0.0);
        placeholder.status = ResourceStatus::Provisioning;
        let id = placeholder.id.clone();
        self.registry.insert(placeholder);

        match self.provisioner.provision(ResourceType::CloudFunction).await {
            Ok(provisioned) => {
                // Fill in the provisioned shape before flipping to Idle
                if let Some(mut resource) = self.registry.remove(&id) {
                    resource.capacity = provisioned.capacity;
                    resource.metadata = provisioned.metadata;
                    resource.status = ResourceStatus::Idle;
                    self.registry.insert(resource);
                }
                counter!("matchsim.scaling.up").increment(1);
                info!(resource_id = %id, "Elastic resource provisioned");
                self.emit(&ResourceEvent::Added {
                    id,
                    resource_type: ResourceType::CloudFunction,
                });
            }
            Err(err) => {
                self.registry.remove(&id);
                warn!(error = %err, "Provisioning failed, continuing");
            }
        }
    }

    /// Distribute a batch across idle resources proportionally to capacity.
    ///
    /// Idle resources are claimed atomically, stay `Busy` for the duration
    /// of their partition, and return to `Idle` afterwards even on partial
    /// failure; a resource that entered `Error` mid-dispatch keeps that
    /// state. Results come back in the batch's scenario order.
    pub async fn distribute_batch(&self, batch: SimulationBatch) -> Result<Vec<SimulationResult>> {
        if batch.scenarios.is_empty() {
            return Ok(Vec::new());
        }

        // Claim every idle resource in one registry critical section so a
        // concurrent dispatch cannot double-book them
        let claimed = self.registry.claim_idle();
        if claimed.is_empty() {
            warn!(batch_id = %batch.id, "No available compute resources");
            return Err(EngineError::NoAvailableResources);
        }

        // Per-batch options may ride in the opaque batch config
        let options: SimulationOptions =
            serde_json::from_value(batch.config.clone()).unwrap_or_default();

        let partitions = partition_by_capacity(batch.scenarios.clone(), &claimed);
        // Claimed resources whose share rounded to zero go straight back
        for resource in &claimed {
            if !partitions.iter().any(|(id, _)| id == &resource.id) {
                self.registry.release_busy(&resource.id);
            }
        }
        debug!(
            batch_id = %batch.id,
            scenarios = batch.scenarios.len(),
            partitions = partitions.len(),
            priority = batch.priority,
            "Distributing batch"
        );

        let priority = batch.priority;
        let runs = partitions.into_iter().map(|(resource_id, partition)| {
            let load = partition.len() as f64;
            self.registry
                .update_status(&resource_id, ResourceStatus::Busy, Some(load));
            async move {
                let outcome = self
                    .engine
                    .run_batch_simulations(partition, options, priority)
                    .await;
                // Restore even when the partition failed; a resource marked
                // Error (or removed) in the meantime keeps that state
                self.registry.release_busy(&resource_id);
                outcome
            }
        });

        let mut results = Vec::with_capacity(batch.scenarios.len());
        let mut first_error = None;
        for outcome in join_all(runs).await {
            match outcome {
                Ok(mut partition_results) => results.append(&mut partition_results),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    /// Best-effort teardown of every resource; idempotent, never errors
    pub async fn cleanup(&self) {
        let drained = self.registry.clear();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Resource manager cleanup");
        for resource in &drained {
            if !resource.resource_type.is_elastic() {
                continue;
            }
            if let Err(err) = self.provisioner.teardown(resource).await {
                warn!(resource_id = %resource.id, error = %err, "Teardown failed during cleanup");
            }
        }
    }
}

/// Split scenarios into contiguous chunks sized proportionally to each
/// resource's capacity (largest-remainder rounding); concatenating the
/// chunks in order reproduces the input order
fn partition_by_capacity(
    scenarios: Vec<SimulationScenario>,
    resources: &[ComputeResource],
) -> Vec<(String, Vec<SimulationScenario>)> {
    let n = scenarios.len();
    let total_capacity: f64 = resources.iter().map(|r| r.capacity.max(0.0)).sum();

    let mut quotas: Vec<(usize, usize, f64)> = resources
        .iter()
        .enumerate()
        .map(|(index, resource)| {
            let share = if total_capacity > 0.0 {
                n as f64 * resource.capacity.max(0.0) / total_capacity
            } else {
                n as f64 / resources.len() as f64
            };
            (index, share.floor() as usize, share.fract())
        })
        .collect();

    let assigned: usize = quotas.iter().map(|(_, count, _)| count).sum();
    let mut remainder = n - assigned;

    // Hand leftover scenarios to the largest fractional shares first
    quotas.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    for quota in quotas.iter_mut() {
        if remainder == 0 {
            break;
        }
        quota.1 += 1;
        remainder -= 1;
    }
    quotas.sort_by_key(|(index, _, _)| *index);

    let mut partitions = Vec::new();
    let mut scenarios = scenarios.into_iter();
    for (index, count, _) in quotas {
        if count == 0 {
            continue;
        }
        let chunk: Vec<SimulationScenario> = scenarios.by_ref().take(count).collect();
        partitions.push((resources[index].id.clone(), chunk));
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::worker::{JobContext, ScenarioRunner, WorkerMessage};
    use crate::model::ConfidenceInterval;
    use crate::utils::config::RuntimeConfig;
    use futures::future::BoxFuture;
    use std::time::Duration;

    /// Sleeps a fixed time per scenario before completing
    struct SlowRunner {
        delay: Duration,
    }

    impl ScenarioRunner for SlowRunner {
        fn run(&self, scenario: SimulationScenario, ctx: JobContext) -> BoxFuture<'static, ()> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                let result = SimulationResult {
                    scenario_id: scenario.id.clone(),
                    iterations: scenario.iterations,
                    outcomes: vec![0.5],
                    confidence_interval: ConfidenceInterval {
                        lower: 0.4,
                        upper: 0.6,
                        level: 0.95,
                    },
                    key_factors: vec![],
                    execution_time_ms: 1,
                };
                let _ = ctx.messages.send(WorkerMessage::Completed(Box::new(result)));
            })
        }
    }

    fn manager_with_runner(
        policy: ScalingPolicy,
        runner: Arc<dyn ScenarioRunner>,
    ) -> Arc<ResourceManager> {
        let config = EngineConfig {
            runtime: RuntimeConfig {
                pool_size: 4,
                progress_chunk: 100,
                ..Default::default()
            },
            scaling: policy,
        };
        let engine = Arc::new(SimulationEngine::with_runner(config.runtime.clone(), runner));
        let provisioner = Arc::new(
            SimulatedProvisioner::new().with_startup_delay(Duration::ZERO),
        );
        Arc::new(ResourceManager::with_provisioner(engine, &config, provisioner))
    }

    fn manager_with(policy: ScalingPolicy) -> ResourceManager {
        let config = EngineConfig {
            runtime: RuntimeConfig {
                pool_size: 4,
                progress_chunk: 100,
                ..Default::default()
            },
            scaling: policy,
        };
        let engine = Arc::new(SimulationEngine::new(config.runtime.clone()));
        let provisioner = Arc::new(
            SimulatedProvisioner::new().with_startup_delay(Duration::ZERO),
        );
        ResourceManager::with_provisioner(engine, &config, provisioner)
    }

    fn fast_policy() -> ScalingPolicy {
        ScalingPolicy {
            min_resources: 1,
            max_resources: 5,
            cooldown_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_seeds_local_workers_at_construction() {
        let manager = manager_with(ScalingPolicy {
            min_resources: 2,
            ..fast_policy()
        });
        let resources = manager.resources();
        assert_eq!(resources.len(), 2);
        assert!(resources
            .iter()
            .all(|r| r.resource_type == ResourceType::LocalWorker
                && r.status == ResourceStatus::Idle));
    }

    #[tokio::test]
    async fn test_add_remove_update_resource() {
        let manager = manager_with(fast_policy());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let sub = manager.on_resource_event(move |event| {
            events_clone.lock().push(format!("{event:?}"));
        });

        let id = manager.add_resource(ResourceSpec {
            resource_type: ResourceType::Container,
            capacity: 2.0,
            metadata: HashMap::new(),
        });
        assert!(manager.get_resource(&id).is_some());
        assert!(manager.update_resource_status(&id, ResourceStatus::Busy, Some(2.0)));
        assert_eq!(manager.get_resource(&id).unwrap().status, ResourceStatus::Busy);

        assert!(manager.remove_resource(&id));
        assert!(!manager.remove_resource(&id));
        assert!(!manager.update_resource_status(&id, ResourceStatus::Idle, None));

        let seen = events.lock().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("Added"));
        assert!(seen[1].contains("Removed"));
        assert!(manager.unsubscribe(sub));
    }

    #[tokio::test]
    async fn test_utilization_bounds() {
        let manager = manager_with(fast_policy());
        assert_eq!(manager.current_utilization(), 0.0);

        let local_id = manager.resources()[0].id.clone();
        manager.update_resource_status(&local_id, ResourceStatus::Busy, Some(100.0));
        let utilization = manager.current_utilization();
        assert!((0.0..=1.0).contains(&utilization));
        assert_eq!(utilization, 1.0);
    }

    #[tokio::test]
    async fn test_backlog_triggers_scale_up_within_max() {
        let manager = manager_with(fast_policy());
        let local_id = manager.resources()[0].id.clone();
        manager.update_resource_status(&local_id, ResourceStatus::Busy, Some(1.0));

        manager.scale_compute_resources(10).await;

        let stats = manager.resource_stats();
        assert!(stats.active >= 2, "expected at least one provisioned resource");
        assert!(stats.active <= 5);
        assert_eq!(stats.queue_depth, 10);
    }

    #[tokio::test]
    async fn test_scale_down_removes_idle_elastic_after_cooldown() {
        let manager = manager_with(fast_policy());
        let elastic_id = manager.add_resource(ResourceSpec {
            resource_type: ResourceType::CloudFunction,
            capacity: 4.0,
            metadata: HashMap::new(),
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.scale_compute_resources(0).await;

        assert!(manager.get_resource(&elastic_id).is_none());
        let stats = manager.resource_stats();
        assert!(stats.active >= 1);
        // The seeded local worker is never an auto-scaling victim
        assert_eq!(
            manager.resources()[0].resource_type,
            ResourceType::LocalWorker
        );
    }

    #[tokio::test]
    async fn test_scaling_respects_bounds_over_many_cycles() {
        let policy = fast_policy();
        let manager = manager_with(policy.clone());
        let local_id = manager.resources()[0].id.clone();

        for cycle in 0..10 {
            if cycle % 2 == 0 {
                manager.update_resource_status(&local_id, ResourceStatus::Busy, Some(4.0));
                manager.scale_compute_resources(25).await;
            } else {
                manager.update_resource_status(&local_id, ResourceStatus::Idle, Some(0.0));
                tokio::time::sleep(Duration::from_millis(25)).await;
                manager.scale_compute_resources(0).await;
            }
            let active = manager.resource_stats().active;
            assert!(active >= policy.min_resources);
            assert!(active <= policy.max_resources);
        }
    }

    #[tokio::test]
    async fn test_provisioning_failure_does_not_propagate() {
        let config = EngineConfig {
            runtime: RuntimeConfig::default(),
            scaling: fast_policy(),
        };
        let engine = Arc::new(SimulationEngine::new(config.runtime.clone()));
        let provisioner =
            Arc::new(SimulatedProvisioner::new().with_startup_delay(Duration::ZERO));
        provisioner.fail_next_provision();
        let manager =
            ResourceManager::with_provisioner(
                engine,
                &config,
                Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            );

        let before = manager.resource_stats().active;
        let local_id = manager.resources()[0].id.clone();
        manager.update_resource_status(&local_id, ResourceStatus::Busy, Some(4.0));
        manager.scale_compute_resources(1).await;

        // Failed placeholder left no residue; next cycle provisions fine
        let after_failure = manager.resource_stats();
        assert_eq!(after_failure.active, before);

        manager.scale_compute_resources(1).await;
        assert!(manager.resource_stats().active > before);
    }

    #[tokio::test]
    async fn test_distribute_empty_batch_touches_nothing() {
        let manager = manager_with(fast_policy());
        let before: Vec<_> = manager.resources().iter().map(|r| r.status).collect();

        let results = manager
            .distribute_batch(SimulationBatch::new("b1", Vec::new()))
            .await
            .unwrap();
        assert!(results.is_empty());

        let after: Vec<_> = manager.resources().iter().map(|r| r.status).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_distribute_with_no_idle_resources_errors() {
        let manager = manager_with(fast_policy());
        for resource in manager.resources() {
            manager.update_resource_status(&resource.id, ResourceStatus::Busy, None);
        }

        let batch = SimulationBatch::new("b1", vec![SimulationScenario::new("s1", 100)]);
        let err = manager.distribute_batch(batch).await.unwrap_err();
        assert!(matches!(err, EngineError::NoAvailableResources));
    }

    #[tokio::test]
    async fn test_distribute_batch_preserves_order_and_restores_idle() {
        let manager = manager_with(fast_policy());
        manager.add_resource(ResourceSpec {
            resource_type: ResourceType::CloudFunction,
            capacity: 4.0,
            metadata: HashMap::new(),
        });

        let scenarios: Vec<SimulationScenario> = (0..6)
            .map(|i| SimulationScenario::new(format!("s{i}"), 200 + i * 10))
            .collect();
        let batch = SimulationBatch::new("b1", scenarios.clone()).with_priority(2);

        let results = manager.distribute_batch(batch).await.unwrap();
        assert_eq!(results.len(), 6);
        for (i, scenario) in scenarios.iter().enumerate() {
            assert_eq!(results[i].scenario_id, scenario.id);
        }

        assert!(manager
            .resources()
            .iter()
            .all(|r| r.status == ResourceStatus::Idle && r.current_load == 0.0));
    }

    #[tokio::test]
    async fn test_concurrent_batches_cannot_share_a_resource() {
        let manager = manager_with_runner(
            fast_policy(),
            Arc::new(SlowRunner {
                delay: Duration::from_millis(150),
            }),
        );

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let batch =
                    SimulationBatch::new("b1", vec![SimulationScenario::new("s1", 100)]);
                manager.distribute_batch(batch).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Every idle resource is claimed by the first batch
        let batch = SimulationBatch::new("b2", vec![SimulationScenario::new("s2", 100)]);
        let err = manager.distribute_batch(batch).await.unwrap_err();
        assert!(matches!(err, EngineError::NoAvailableResources));

        first.await.unwrap().unwrap();
        assert!(manager
            .resources()
            .iter()
            .all(|r| r.status == ResourceStatus::Idle));
    }

    #[tokio::test]
    async fn test_resource_failing_mid_batch_stays_errored() {
        let manager = manager_with_runner(
            fast_policy(),
            Arc::new(SlowRunner {
                delay: Duration::from_millis(150),
            }),
        );
        let resource_id = manager.resources()[0].id.clone();

        let dispatch = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let batch =
                    SimulationBatch::new("b1", vec![SimulationScenario::new("s1", 100)]);
                manager.distribute_batch(batch).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The resource dies while its partition is still running
        assert!(manager.update_resource_status(&resource_id, ResourceStatus::Error, None));

        dispatch.await.unwrap().unwrap();
        assert_eq!(
            manager.get_resource(&resource_id).unwrap().status,
            ResourceStatus::Error,
            "completed dispatch must not resurrect a failed resource"
        );
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let manager = manager_with(fast_policy());
        manager.add_resource(ResourceSpec {
            resource_type: ResourceType::Container,
            capacity: 2.0,
            metadata: HashMap::new(),
        });

        manager.cleanup().await;
        assert!(manager.resources().is_empty());
        assert_eq!(manager.resource_stats().active, 0);

        manager.cleanup().await;
        assert!(manager.resources().is_empty());
    }

    #[test]
    fn test_partition_proportional_to_capacity() {
        let big = ComputeResource::new(ResourceType::LocalWorker, 6.0);
        let small = ComputeResource::new(ResourceType::CloudFunction, 2.0);
        let scenarios: Vec<SimulationScenario> = (0..8)
            .map(|i| SimulationScenario::new(format!("s{i}"), 100))
            .collect();

        let partitions = partition_by_capacity(scenarios.clone(), &[big.clone(), small.clone()]);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].0, big.id);
        assert_eq!(partitions[0].1.len(), 6);
        assert_eq!(partitions[1].1.len(), 2);

        // Concatenation reproduces input order
        let flattened: Vec<String> = partitions
            .into_iter()
            .flat_map(|(_, chunk)| chunk.into_iter().map(|s| s.id))
            .collect();
        let expected: Vec<String> = scenarios.into_iter().map(|s| s.id).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_partition_zero_capacity_falls_back_to_even_split() {
        let a = ComputeResource::new(ResourceType::LocalWorker, 0.0);
        let b = ComputeResource::new(ResourceType::Container, 0.0);
        let scenarios: Vec<SimulationScenario> = (0..4)
            .map(|i| SimulationScenario::new(format!("s{i}"), 100))
            .collect();

        let partitions = partition_by_capacity(scenarios, &[a, b]);
        let total: usize = partitions.iter().map(|(_, chunk)| chunk.len()).sum();
        assert_eq!(total, 4);
        assert!(partitions.iter().all(|(_, chunk)| chunk.len() == 2));
    }
}
