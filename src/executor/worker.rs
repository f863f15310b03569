// src/executor/worker.rs
//! Worker-side simulation execution
//!
//! A dispatched job owns a single-use message channel. The worker reports
//! back through a tagged union ([`WorkerMessage`]): zero or more `Progress`
//! messages followed by exactly one terminal `Completed` or `Failed`. The
//! coordinator correlates messages through the per-job channel, so no
//! global routing table is needed.
//!
//! [`ScenarioRunner`] is the seam between scheduling and sampling: the
//! engine knows nothing about how a scenario numerically produces outcomes.
//! [`MonteCarloRunner`] is the default, sampling a normal outcome
//! distribution parameterized by the scenario's opaque `variables` payload.

use crate::model::{ConfidenceInterval, KeyFactor, SimulationResult, SimulationScenario, SimulationTask};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Message from a worker to the coordinating job future
#[derive(Debug)]
pub enum WorkerMessage {
    /// Periodic progress report; `completed_iterations` is cumulative
    Progress { completed_iterations: u32 },
    /// Terminal: the simulation finished
    Completed(Box<SimulationResult>),
    /// Terminal: the worker hit an unrecoverable failure
    Failed { message: String },
}

/// Everything a worker needs to execute one job
pub struct JobContext {
    /// Correlation record for this dispatch
    pub task: SimulationTask,
    /// Cooperative cancellation signal, checked between chunks
    pub cancel: CancellationToken,
    /// Iterations per progress report
    pub progress_chunk: u32,
    /// Single-use channel back to the coordinator
    pub messages: mpsc::UnboundedSender<WorkerMessage>,
}

/// Executes one scenario and reports through the job's message channel.
///
/// Implementations must send exactly one terminal message unless cancelled,
/// and should stop promptly once `ctx.cancel` fires; the coordinator will
/// force-abort after a short grace window regardless.
pub trait ScenarioRunner: Send + Sync {
    fn run(&self, scenario: SimulationScenario, ctx: JobContext) -> BoxFuture<'static, ()>;
}

/// Default runner: repeated randomized trials against the scenario payload
pub struct MonteCarloRunner;

/// Distribution parameters read from the scenario's `variables` payload
struct OutcomeModel {
    mean: f64,
    std_dev: f64,
    factors: Vec<KeyFactor>,
}

impl OutcomeModel {
    /// Accepts `{"mean": .., "std_dev": .., <factor>: <weight>, ..}`;
    /// anything unrecognized falls back to defaults
    fn from_scenario(scenario: &SimulationScenario) -> Self {
        let mut mean = 0.5;
        let mut std_dev = 0.15;
        let mut factors = Vec::new();

        if let serde_json::Value::Object(map) = &scenario.variables {
            for (key, value) in map {
                let Some(number) = value.as_f64() else { continue };
                match key.as_str() {
                    "mean" => mean = number,
                    "std_dev" => std_dev = number.abs(),
                    _ => factors.push(KeyFactor {
                        name: key.clone(),
                        impact: number,
                    }),
                }
            }
        }

        factors.sort_by(|a, b| {
            b.impact
                .abs()
                .partial_cmp(&a.impact.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        factors.truncate(5);

        Self {
            mean,
            std_dev,
            factors,
        }
    }

    /// One trial: Box-Muller normal sample around the model mean
    fn sample(&self, rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        self.mean + self.std_dev * z
    }
}

/// 95% confidence interval for the mean of the sampled outcomes
fn confidence_interval(outcomes: &[f64]) -> ConfidenceInterval {
    if outcomes.is_empty() {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 0.0,
            level: 0.95,
        };
    }
    let n = outcomes.len() as f64;
    let mean = outcomes.iter().sum::<f64>() / n;
    let variance = outcomes.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let half_width = 1.96 * (variance / n).sqrt();
    ConfidenceInterval {
        lower: mean - half_width,
        upper: mean + half_width,
        level: 0.95,
    }
}

impl ScenarioRunner for MonteCarloRunner {
    fn run(&self, scenario: SimulationScenario, ctx: JobContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let model = OutcomeModel::from_scenario(&scenario);
            let mut rng = StdRng::from_entropy();
            let total = scenario.iterations;
            let chunk = ctx.progress_chunk.max(1);

            debug!(
                scenario_id = %scenario.id,
                task_id = %ctx.task.task_id,
                iterations = total,
                "Running Monte Carlo trials"
            );

            let mut outcomes = Vec::with_capacity(total as usize);
            let mut completed: u32 = 0;
            while completed < total {
                if ctx.cancel.is_cancelled() {
                    debug!(scenario_id = %scenario.id, "Worker observed cancellation");
                    return;
                }

                let batch = chunk.min(total - completed);
                for _ in 0..batch {
                    outcomes.push(model.sample(&mut rng));
                }
                completed += batch;

                if ctx
                    .messages
                    .send(WorkerMessage::Progress {
                        completed_iterations: completed,
                    })
                    .is_err()
                {
                    // Coordinator gone (timeout or teardown); stop quietly
                    return;
                }

                // Keep the executor responsive between CPU-bound chunks
                tokio::task::yield_now().await;
            }

            let result = SimulationResult {
                scenario_id: scenario.id.clone(),
                iterations: total,
                confidence_interval: confidence_interval(&outcomes),
                key_factors: model.factors,
                outcomes,
                execution_time_ms: started.elapsed().as_millis() as u64,
            };
            let _ = ctx.messages.send(WorkerMessage::Completed(Box::new(result)));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(
        scenario_id: &str,
        chunk: u32,
    ) -> (JobContext, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            JobContext {
                task: SimulationTask::new(scenario_id),
                cancel: CancellationToken::new(),
                progress_chunk: chunk,
                messages: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_runner_completes_with_result() {
        let scenario = SimulationScenario::new("s1", 1000);
        let (ctx, mut rx) = context("s1", 250);

        MonteCarloRunner.run(scenario, ctx).await;

        let mut terminal = None;
        let mut last_progress = 0;
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMessage::Progress {
                    completed_iterations,
                } => {
                    assert!(completed_iterations >= last_progress);
                    last_progress = completed_iterations;
                }
                other => terminal = Some(other),
            }
        }

        match terminal {
            Some(WorkerMessage::Completed(result)) => {
                assert_eq!(result.scenario_id, "s1");
                assert_eq!(result.iterations, 1000);
                assert_eq!(result.outcomes.len(), 1000);
                assert!(result.confidence_interval.lower <= result.confidence_interval.upper);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(last_progress, 1000);
    }

    #[tokio::test]
    async fn test_runner_stops_on_cancellation() {
        let scenario = SimulationScenario::new("s1", 100_000);
        let (ctx, mut rx) = context("s1", 10);
        ctx.cancel.cancel();

        MonteCarloRunner.run(scenario, ctx).await;

        // No terminal message after a pre-start cancellation
        while let Some(msg) = rx.recv().await {
            assert!(matches!(msg, WorkerMessage::Progress { .. }));
        }
    }

    #[tokio::test]
    async fn test_outcome_model_reads_variables() {
        let mut scenario = SimulationScenario::new("s1", 10);
        scenario.variables = json!({
            "mean": 2.0,
            "std_dev": 0.0,
            "home_advantage": 0.3,
            "injuries": -0.2,
        });

        let model = OutcomeModel::from_scenario(&scenario);
        assert_eq!(model.mean, 2.0);
        assert_eq!(model.factors.len(), 2);
        assert_eq!(model.factors[0].name, "home_advantage");

        let mut rng = StdRng::seed_from_u64(7);
        // Zero deviation collapses every trial onto the mean
        assert!((model.sample(&mut rng) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_interval_tightens_with_samples() {
        let narrow: Vec<f64> = (0..10_000).map(|i| 0.5 + ((i % 3) as f64) * 0.01).collect();
        let wide: Vec<f64> = (0..10).map(|i| 0.5 + ((i % 3) as f64) * 0.01).collect();

        let narrow_ci = confidence_interval(&narrow);
        let wide_ci = confidence_interval(&wide);
        assert!(narrow_ci.upper - narrow_ci.lower <= wide_ci.upper - wide_ci.lower);
        assert_eq!(narrow_ci.level, 0.95);
    }
}
