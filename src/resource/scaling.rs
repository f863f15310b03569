// src/resource/scaling.rs
//! Auto-scaling policy and decision evaluation
//!
//! The evaluator is a pure function over a point-in-time snapshot
//! ([`ScalingContext`]); the resource manager builds the snapshot from
//! fresh registry state, applies the decision, and enforces the bounds
//! again at apply time.

use serde::{Deserialize, Serialize};

/// Nominal capacity assumed for one elastic resource when sizing a
/// scale-up against queue backlog
pub const ELASTIC_RESOURCE_CAPACITY: f64 = 4.0;

/// Immutable scaling configuration supplied at construction.
///
/// Per-field serde defaults let a partial `[scaling]` table override only
/// the fields it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Floor on active resource count
    #[serde(default = "default_min_resources")]
    pub min_resources: usize,
    /// Ceiling on active resource count
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,
    /// Utilization the loop steers toward
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    /// Utilization above which the loop adds elastic resources
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    /// Utilization below which the loop removes idle elastic resources
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    /// Minimum interval between a scaling action and a later scale-down, ms
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_min_resources() -> usize {
    1
}

fn default_max_resources() -> usize {
    8
}

fn default_target_utilization() -> f64 {
    0.65
}

fn default_scale_up_threshold() -> f64 {
    0.8
}

fn default_scale_down_threshold() -> f64 {
    0.3
}

fn default_cooldown_ms() -> u64 {
    60_000
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_resources: default_min_resources(),
            max_resources: default_max_resources(),
            target_utilization: default_target_utilization(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_resources < 1 {
            return Err("min_resources must be >= 1".into());
        }
        if self.max_resources < self.min_resources {
            return Err("max_resources must be >= min_resources".into());
        }
        for (name, value) in [
            ("target_utilization", self.target_utilization),
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1]"));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err("scale_down_threshold must be below scale_up_threshold".into());
        }
        Ok(())
    }
}

/// Snapshot of the registry and queue at decision time
#[derive(Debug, Clone, Copy)]
pub struct ScalingContext {
    /// Active (non-error) resources
    pub active_resources: usize,
    /// Aggregate utilization, clamped to [0, 1]
    pub utilization: f64,
    /// Most recently observed backlog of queued simulation jobs
    pub queue_depth: usize,
    /// Spare capacity across idle resources
    pub idle_capacity: f64,
    /// Idle elastic (cloud/container) resources eligible for removal
    pub idle_elastic: usize,
    /// Whether the cooldown window since the last scaling action elapsed
    pub cooldown_elapsed: bool,
}

/// Outcome of one scaling evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDecision {
    /// No action needed
    None,
    /// Provision `count` additional elastic resources
    ScaleUp { count: usize, reason: String },
    /// Remove `count` idle elastic resources, most recently added first
    ScaleDown { count: usize, reason: String },
}

/// Pure scaling decision: never returns an action that would push the
/// active count outside `[min_resources, max_resources]`
pub fn evaluate(policy: &ScalingPolicy, ctx: &ScalingContext) -> ScalingDecision {
    let backlog_overflow = ctx.queue_depth as f64 > ctx.idle_capacity;
    let pressure = ctx.utilization > policy.scale_up_threshold || backlog_overflow;

    if pressure && ctx.active_resources < policy.max_resources {
        let headroom = policy.max_resources - ctx.active_resources;
        let shortfall = (ctx.queue_depth as f64 - ctx.idle_capacity).max(0.0);
        let wanted = (shortfall / ELASTIC_RESOURCE_CAPACITY).ceil() as usize;
        let count = wanted.max(1).min(headroom);
        let reason = if backlog_overflow {
            format!(
                "queue depth {} exceeds idle capacity {:.1}",
                ctx.queue_depth, ctx.idle_capacity
            )
        } else {
            format!(
                "utilization {:.2} above threshold {:.2}",
                ctx.utilization, policy.scale_up_threshold
            )
        };
        return ScalingDecision::ScaleUp { count, reason };
    }

    if ctx.utilization < policy.scale_down_threshold
        && ctx.idle_elastic > 0
        && ctx.active_resources > policy.min_resources
        && ctx.cooldown_elapsed
    {
        return ScalingDecision::ScaleDown {
            count: 1,
            reason: format!(
                "utilization {:.2} below threshold {:.2}",
                ctx.utilization, policy.scale_down_threshold
            ),
        };
    }

    ScalingDecision::None
}
