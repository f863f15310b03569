// src/executor/progress.rs
//! In-flight progress tracking and typed progress observers
//!
//! The engine exclusively owns this table; at most one entry exists per
//! scenario id. Observers are an explicit subscriber list (no global event
//! bus) and receive every update; updates for a single scenario arrive in
//! non-decreasing `completed_iterations` order because the monotonic clamp
//! happens under the entry's shard lock before notification.

use crate::model::{SimulationProgress, SimulationStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Handle returned by [`ProgressTracker::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ProgressCallback = Box<dyn Fn(&SimulationProgress) + Send + Sync>;

/// Progress table plus observer registry
pub struct ProgressTracker {
    entries: DashMap<String, SimulationProgress>,
    observers: Mutex<HashMap<SubscriptionId, Arc<ProgressCallback>>>,
    next_subscription: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            observers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Insert a fresh entry. Returns `false` if a job for this scenario id
    /// is already in flight (at-most-one invariant).
    pub fn insert(&self, progress: SimulationProgress) -> bool {
        match self.entries.entry(progress.scenario_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(progress);
                true
            }
        }
    }

    pub fn get(&self, scenario_id: &str) -> Option<SimulationProgress> {
        self.entries.get(scenario_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, scenario_id: &str) -> Option<SimulationProgress> {
        self.entries.remove(scenario_id).map(|(_, progress)| progress)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Mark a job as running on a worker
    pub fn mark_running(&self, scenario_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(scenario_id) {
            entry.status = SimulationStatus::Running;
        }
    }

    /// Mark a job as draining after a cancellation signal
    pub fn mark_cancelling(&self, scenario_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(scenario_id) {
            entry.status = SimulationStatus::Cancelling;
        }
    }

    /// Record completed iterations (clamped monotonic) and notify observers
    /// with the updated snapshot
    pub fn record_iterations(&self, scenario_id: &str, completed: u32) {
        let snapshot = match self.entries.get_mut(scenario_id) {
            Some(mut entry) => {
                if completed > entry.completed_iterations {
                    entry.completed_iterations = completed.min(entry.total_iterations);
                }
                entry.clone()
            }
            None => return, // already terminal
        };

        trace!(
            scenario_id,
            completed = snapshot.completed_iterations,
            total = snapshot.total_iterations,
            "Simulation progress"
        );
        self.notify(&snapshot);
    }

    /// Register an observer invoked on every progress update
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SimulationProgress) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().insert(id, Arc::new(Box::new(callback)));
        id
    }

    /// Remove an observer; unknown ids are a no-op
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.lock().remove(&id).is_some()
    }

    fn notify(&self, progress: &SimulationProgress) {
        // Snapshot the callbacks so observer code never runs under the lock
        let callbacks: Vec<Arc<ProgressCallback>> =
            self.observers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(progress);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_at_most_one_entry_per_scenario() {
        let tracker = ProgressTracker::new();
        assert!(tracker.insert(SimulationProgress::started("s1", 100)));
        assert!(!tracker.insert(SimulationProgress::started("s1", 100)));
        tracker.remove("s1");
        assert!(tracker.insert(SimulationProgress::started("s1", 100)));
    }

    #[test]
    fn test_monotonic_progress() {
        let tracker = ProgressTracker::new();
        tracker.insert(SimulationProgress::started("s1", 1000));

        tracker.record_iterations("s1", 300);
        tracker.record_iterations("s1", 200); // stale update, ignored
        assert_eq!(tracker.get("s1").unwrap().completed_iterations, 300);

        // Clamped to the total
        tracker.record_iterations("s1", 5000);
        assert_eq!(tracker.get("s1").unwrap().completed_iterations, 1000);
    }

    #[test]
    fn test_observers_receive_updates() {
        let tracker = ProgressTracker::new();
        tracker.insert(SimulationProgress::started("s1", 100));

        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        let sub = tracker.subscribe(move |p| {
            seen_clone.store(p.completed_iterations, Ordering::SeqCst);
        });

        tracker.record_iterations("s1", 42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);

        assert!(tracker.unsubscribe(sub));
        assert!(!tracker.unsubscribe(sub));
        tracker.record_iterations("s1", 80);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_update_after_removal_is_noop() {
        let tracker = ProgressTracker::new();
        tracker.insert(SimulationProgress::started("s1", 100));
        tracker.remove("s1");
        tracker.record_iterations("s1", 50);
        assert!(tracker.get("s1").is_none());
    }
}
