// src/executor/engine.rs
//! Simulation execution engine
//!
//! Owns a bounded pool of worker slots and the in-flight progress table.
//! Each job runs on its own spawned worker task and talks back over a
//! single-use message channel; the coordinating future (the caller's
//! `run_simulation` call) serializes all tracking mutations for that job.
//!
//! Lifecycle guarantees, on every exit path (success, worker failure,
//! timeout, cancellation, caller drop):
//!
//! - the progress entry for the scenario is removed
//! - the worker slot returns to the pool
//! - `active_job_count()` returns to its pre-call value

use crate::executor::progress::{ProgressTracker, SubscriptionId};
use crate::executor::slots::WorkerSlots;
use crate::executor::worker::{JobContext, MonteCarloRunner, ScenarioRunner, WorkerMessage};
use crate::model::{
    SimulationOptions, SimulationProgress, SimulationResult, SimulationScenario, SimulationTask,
};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tracking state for one in-flight job, keyed by scenario id
struct JobHandle {
    task_id: String,
    cancel: CancellationToken,
    /// Set once the worker task is spawned; used for forced termination
    abort: Mutex<Option<AbortHandle>>,
}

/// Point-in-time engine snapshot
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub pool_size: usize,
    pub available_slots: usize,
    pub busy_slots: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
}

/// Bounded-concurrency executor for Monte Carlo simulation jobs
pub struct SimulationEngine {
    config: RuntimeConfig,
    runner: Arc<dyn ScenarioRunner>,
    slots: Arc<WorkerSlots>,
    progress: Arc<ProgressTracker>,
    jobs: Arc<DashMap<String, JobHandle>>,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl SimulationEngine {
    /// Engine with the default Monte Carlo runner
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_runner(config, Arc::new(MonteCarloRunner))
    }

    /// Engine with an injected scenario runner (the sampling seam)
    pub fn with_runner(config: RuntimeConfig, runner: Arc<dyn ScenarioRunner>) -> Self {
        info!(pool_size = config.pool_size, "Initializing simulation engine");
        let slots = WorkerSlots::new(config.pool_size);
        Self {
            config,
            runner,
            slots,
            progress: Arc::new(ProgressTracker::new()),
            jobs: Arc::new(DashMap::new()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Run a single scenario to completion.
    ///
    /// Validation failures reject before any worker is touched. With
    /// `options.timeout_ms` set, the deadline covers queueing and execution;
    /// on expiry the worker is force-terminated and the call rejects with
    /// [`EngineError::Timeout`].
    pub async fn run_simulation(
        &self,
        scenario: SimulationScenario,
        options: SimulationOptions,
    ) -> Result<SimulationResult> {
        self.run_with_priority(scenario, options, 0).await
    }

    pub(crate) async fn run_with_priority(
        &self,
        scenario: SimulationScenario,
        options: SimulationOptions,
        priority: u32,
    ) -> Result<SimulationResult> {
        scenario.validate()?;
        let scenario_id = scenario.id.clone();

        // At-most-one concurrent job per scenario id
        if !self
            .progress
            .insert(SimulationProgress::started(&scenario_id, scenario.iterations))
        {
            return Err(EngineError::Validation(format!(
                "scenario '{}' already has a job in flight",
                scenario_id
            )));
        }

        let cancel = CancellationToken::new();
        let task = SimulationTask::new(&scenario_id);
        debug!(
            scenario_id = %scenario_id,
            task_id = %task.task_id,
            iterations = scenario.iterations,
            priority,
            "Dispatching simulation"
        );
        self.jobs.insert(
            scenario_id.clone(),
            JobHandle {
                task_id: task.task_id.clone(),
                cancel: cancel.clone(),
                abort: Mutex::new(None),
            },
        );
        gauge!("matchsim.jobs.active").set(self.jobs.len() as f64);

        // Releases the progress entry, job handle, and worker on every exit
        // path, including the caller dropping this future mid-flight. Keyed
        // by task id: after a cancel the scenario id may already be reused
        // by a resubmitted job, whose state this guard must not touch.
        let _guard = JobGuard {
            scenario_id: scenario_id.clone(),
            task_id: task.task_id.clone(),
            jobs: Arc::clone(&self.jobs),
            progress: Arc::clone(&self.progress),
        };

        let outcome = self.execute_job(scenario, task, options, priority, cancel).await;

        match &outcome {
            Ok(result) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                counter!("matchsim.simulations.completed").increment(1);
                debug!(
                    scenario_id = %scenario_id,
                    execution_time_ms = result.execution_time_ms,
                    "Simulation completed"
                );
            }
            Err(EngineError::Cancelled { .. }) => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                counter!("matchsim.simulations.cancelled").increment(1);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                counter!("matchsim.simulations.failed").increment(1);
                warn!(scenario_id = %scenario_id, error = %err, "Simulation failed");
            }
        }
        outcome
    }

    async fn execute_job(
        &self,
        scenario: SimulationScenario,
        task: SimulationTask,
        options: SimulationOptions,
        priority: u32,
        cancel: CancellationToken,
    ) -> Result<SimulationResult> {
        let scenario_id = scenario.id.clone();
        let task_id = task.task_id.clone();
        let timeout_ms = options.timeout_ms.or(self.config.default_timeout_ms);

        let job = self.drive_worker(scenario, task, priority, cancel);
        match timeout_ms {
            None => job.await,
            Some(ms) => {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
                match tokio::time::timeout_at(deadline, job).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // Hard deadline: terminate the worker, whatever its
                        // state, as long as the entry is still this task's
                        if let Some(handle) = self.jobs.get(&scenario_id) {
                            if handle.task_id == task_id {
                                if let Some(abort) = handle.abort.lock().take() {
                                    abort.abort();
                                }
                            }
                        }
                        warn!(scenario_id = %scenario_id, timeout_ms = ms, "Simulation timed out");
                        Err(EngineError::Timeout {
                            scenario_id,
                            timeout_ms: ms,
                        })
                    }
                }
            }
        }
    }

    /// Acquire a slot, spawn the worker, and pump its message channel until
    /// a terminal message or cancellation
    async fn drive_worker(
        &self,
        scenario: SimulationScenario,
        task: SimulationTask,
        priority: u32,
        cancel: CancellationToken,
    ) -> Result<SimulationResult> {
        let scenario_id = scenario.id.clone();
        let task_id = task.task_id.clone();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(EngineError::Cancelled { scenario_id });
            }
            permit = self.slots.acquire(priority) => permit?,
        };
        self.progress.mark_running(&scenario_id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = JobContext {
            task,
            cancel: cancel.clone(),
            progress_chunk: self.config.progress_chunk,
            messages: tx,
        };
        let mut worker = tokio::spawn(self.runner.run(scenario, ctx));
        if let Some(handle) = self.jobs.get(&scenario_id) {
            if handle.task_id == task_id {
                *handle.abort.lock() = Some(worker.abort_handle());
            }
        }

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.progress.mark_cancelling(&scenario_id);
                    // Cooperative first; force-kill past the grace window
                    let grace = Duration::from_millis(self.config.cancel_grace_ms);
                    if tokio::time::timeout(grace, &mut worker).await.is_err() {
                        warn!(scenario_id = %scenario_id, "Worker unresponsive to cancel, aborting");
                        worker.abort();
                    }
                    break Err(EngineError::Cancelled {
                        scenario_id: scenario_id.clone(),
                    });
                }
                msg = rx.recv() => match msg {
                    Some(WorkerMessage::Progress { completed_iterations }) => {
                        self.progress.record_iterations(&scenario_id, completed_iterations);
                    }
                    Some(WorkerMessage::Completed(result)) => break Ok(*result),
                    Some(WorkerMessage::Failed { message }) => {
                        break Err(EngineError::WorkerExecution {
                            scenario_id: scenario_id.clone(),
                            message,
                        });
                    }
                    None => {
                        break Err(EngineError::Runtime(format!(
                            "worker channel closed for scenario '{}'",
                            scenario_id
                        )));
                    }
                }
            }
        };
        drop(permit);
        outcome
    }

    /// Run a batch: execution is ordered cheapest-first by `iterations`,
    /// the returned vec preserves the caller's input order index-for-index,
    /// and `priority` steers slot admission against other queued work.
    pub async fn run_batch_simulations(
        &self,
        scenarios: Vec<SimulationScenario>,
        options: SimulationOptions,
        priority: u32,
    ) -> Result<Vec<SimulationResult>> {
        if scenarios.is_empty() {
            return Ok(Vec::new());
        }

        let total = scenarios.len();
        debug!(count = total, priority, "Dispatching simulation batch");

        let mut indexed: Vec<(usize, SimulationScenario)> =
            scenarios.into_iter().enumerate().collect();
        // Cheapest first: minimizes tail latency and surfaces failures early
        indexed.sort_by_key(|(_, scenario)| scenario.iterations);

        let jobs = indexed.into_iter().map(|(index, scenario)| async move {
            let result = self.run_with_priority(scenario, options, priority).await;
            (index, result)
        });
        let settled = futures::future::join_all(jobs).await;

        let mut results: Vec<Option<SimulationResult>> = (0..total).map(|_| None).collect();
        for (index, result) in settled {
            results[index] = Some(result?);
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Cancel an in-flight job. Unknown ids are a no-op returning `false`.
    pub fn cancel_simulation(&self, scenario_id: &str) -> bool {
        let Some(handle) = self.jobs.get(scenario_id) else {
            return false;
        };
        info!(scenario_id, task_id = %handle.task_id, "Cancelling simulation");
        handle.cancel.cancel();
        drop(handle);
        // The progress entry goes away now; the coordinating future settles
        // with `Cancelled` and releases the rest of the tracking state.
        self.progress.remove(scenario_id);
        true
    }

    /// Progress snapshot for an in-flight job, if any
    pub fn simulation_progress(&self, scenario_id: &str) -> Option<SimulationProgress> {
        self.progress.get(scenario_id)
    }

    /// Register an observer invoked on every progress update across all
    /// in-flight jobs
    pub fn on_progress<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SimulationProgress) + Send + Sync + 'static,
    {
        self.progress.subscribe(callback)
    }

    /// Remove a progress observer
    pub fn unsubscribe_progress(&self, id: SubscriptionId) -> bool {
        self.progress.unsubscribe(id)
    }

    /// Number of jobs currently tracked (queued or running)
    pub fn active_job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Point-in-time snapshot of pool and job counters
    pub fn stats(&self) -> EngineStats {
        let available = self.slots.available();
        EngineStats {
            pool_size: self.slots.capacity(),
            available_slots: available,
            busy_slots: self.slots.capacity() - available,
            queued_jobs: self.slots.queued(),
            active_jobs: self.jobs.len(),
            completed_jobs: self.completed.load(Ordering::Relaxed),
            failed_jobs: self.failed.load(Ordering::Relaxed),
            cancelled_jobs: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Terminate every live worker and clear all tracking state.
    /// Idempotent; safe from error-recovery paths.
    pub fn cleanup(&self) {
        let live = self.jobs.len();
        if live > 0 {
            info!(live_jobs = live, "Engine cleanup: terminating live workers");
        }
        for entry in self.jobs.iter() {
            entry.cancel.cancel();
            if let Some(abort) = entry.abort.lock().take() {
                abort.abort();
            }
        }
        self.jobs.clear();
        self.progress.clear();
        gauge!("matchsim.jobs.active").set(0.0);
    }
}

/// Drop guard releasing per-job tracking state on every exit path
struct JobGuard {
    scenario_id: String,
    task_id: String,
    jobs: Arc<DashMap<String, JobHandle>>,
    progress: Arc<ProgressTracker>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        // Only tear down state this job still owns: a cancelled scenario id
        // may have been resubmitted, and the tracking entries then belong
        // to the new task.
        let owned = self
            .jobs
            .remove_if(&self.scenario_id, |_, handle| handle.task_id == self.task_id);
        if let Some((_, handle)) = owned {
            // Harmless if the worker already finished
            if let Some(abort) = handle.abort.lock().take() {
                abort.abort();
            }
            self.progress.remove(&self.scenario_id);
        }
        gauge!("matchsim.jobs.active").set(self.jobs.len() as f64);
    }
}
