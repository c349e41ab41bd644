//! Ramping load generation.
//!
//! The [`LoadDriver`] runs a controller loop that ticks every 100ms, computes the number of
//! workers the [`Scenario`] asks for at that point in time and publishes it on a watch channel.
//! Missing workers are spawned into their slots. A worker keeps running iterations while its slot
//! index is below the published target, so lowering the target retires workers after they finish
//! their current iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::executor::TransactionExecutor;
use crate::scale::ScaleModel;

/// How long in-flight iterations may run on after the last stage.
pub const GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);

const TICK: Duration = Duration::from_millis(100);

/// Settings of the load phase that are not part of the stage plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// An iteration stops issuing transactions once it has been running for this long.
    #[serde(with = "humantime_serde")]
    pub iteration_budget: Duration,
    #[serde(with = "humantime_serde")]
    pub graceful_ramp_down: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            iteration_budget: Duration::from_secs(1),
            graceful_ramp_down: GRACEFUL_RAMP_DOWN,
        }
    }
}

/// A period during which the worker count moves linearly towards `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

/// The sequence of stages that shapes the load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub stages: Vec<Stage>,
    pub graceful_ramp_down: Duration,
}

impl Scenario {
    /// Builds a stepped ramp towards `conns` workers.
    ///
    /// Each of the `ramps` steps ramps up to `ceil(conns · i / ramps)` workers over `ramping` and
    /// then holds that level for `consecutive`.
    pub fn ramping(conns: usize, ramps: u32, ramping: Duration, consecutive: Duration) -> Self {
        let ramps = ramps.max(1) as usize;
        let stages = (1..=ramps)
            .flat_map(|step| {
                let target = (conns * step).div_ceil(ramps);
                [
                    Stage {
                        duration: ramping,
                        target,
                    },
                    Stage {
                        duration: consecutive,
                        target,
                    },
                ]
            })
            .collect();

        Self {
            stages,
            graceful_ramp_down: GRACEFUL_RAMP_DOWN,
        }
    }

    pub fn with_graceful_ramp_down(mut self, graceful_ramp_down: Duration) -> Self {
        self.graceful_ramp_down = graceful_ramp_down;
        self
    }

    /// Total duration of all stages, excluding the graceful ramp-down.
    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// The highest worker count of any stage.
    pub fn peak(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .max()
            .unwrap_or(0)
    }

    /// Number of workers that should be active `elapsed` after the start.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut start = Duration::ZERO;
        let mut from = 0;

        for stage in &self.stages {
            let end = start + stage.duration;
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = stage.target as f64 - from as f64;
                return (from as f64 + delta * progress).round() as usize;
            }
            start = end;
            from = stage.target;
        }

        0
    }
}

/// Aggregate numbers of a finished load phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadSummary {
    /// Time from the start of the first stage until the last worker stopped, including the
    /// graceful ramp-down.
    pub duration: Duration,
    pub iterations: u64,
    /// Number of workers spawned over the whole run.
    pub workers: u64,
}

#[derive(Debug)]
struct IterationContext {
    executor: TransactionExecutor,
    scale: ScaleModel,
    requests: usize,
    budget: Duration,
    iterations: AtomicU64,
}

impl IterationContext {
    async fn iteration(&self, rng: &mut SmallRng) {
        let start = Instant::now();

        for _ in 0..self.requests {
            let params = self.scale.sample(rng);
            let tx_start = Instant::now();
            self.executor.execute(params).await;
            self.executor.metrics().record_latency(tx_start.elapsed());

            if start.elapsed() > self.budget {
                break;
            }
        }

        self.iterations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs transactions from a varying number of concurrent workers.
#[derive(Debug)]
pub struct LoadDriver {
    executor: TransactionExecutor,
    scale: ScaleModel,
    scenario: Scenario,
    requests: usize,
    budget: Duration,
    seed: Option<u64>,
}

impl LoadDriver {
    pub fn new(executor: TransactionExecutor, scale: ScaleModel, scenario: Scenario) -> Self {
        Self {
            executor,
            scale,
            scenario,
            requests: 10,
            budget: LoadConfig::default().iteration_budget,
            seed: None,
        }
    }

    /// Sets the number of transactions each iteration attempts.
    pub fn requests_per_iteration(mut self, requests: usize) -> Self {
        self.requests = requests;
        self
    }

    pub fn iteration_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Makes the generated transaction parameters reproducible.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Runs all stages, then waits for in-flight iterations during the graceful ramp-down.
    ///
    /// Cancelling `cancel` ends the stages early. Workers still finish their current iteration.
    pub async fn run(&self, cancel: CancellationToken) -> LoadSummary {
        let seed = self.seed.unwrap_or_else(rand::random);
        let total = self.scenario.duration();
        tracing::info!(
            seed,
            peak = self.scenario.peak(),
            duration = ?total,
            "starting load"
        );

        let context = Arc::new(IterationContext {
            executor: self.executor.clone(),
            scale: self.scale,
            requests: self.requests,
            budget: self.budget,
            iterations: AtomicU64::new(0),
        });

        let (target_tx, target_rx) = watch::channel(0);
        let mut slots: Vec<Option<JoinHandle<()>>> = Vec::new();
        let mut spawned = 0;

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("load cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let target = self.scenario.target_at(elapsed);
            target_tx.send_replace(target);

            if slots.len() < target {
                slots.resize_with(target, || None);
            }
            for (id, slot) in slots.iter_mut().enumerate().take(target) {
                if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
                    continue;
                }

                let rng = SmallRng::seed_from_u64(seed.wrapping_add(spawned));
                spawned += 1;
                *slot = Some(tokio::spawn(run_worker(
                    Arc::clone(&context),
                    id,
                    target_rx.clone(),
                    cancel.clone(),
                    rng,
                )));
            }
        }

        target_tx.send_replace(0);
        self.ramp_down(slots).await;
        let duration = start.elapsed();

        LoadSummary {
            duration,
            iterations: context.iterations.load(Ordering::Relaxed),
            workers: spawned,
        }
    }

    async fn ramp_down(&self, slots: Vec<Option<JoinHandle<()>>>) {
        let handles: Vec<_> = slots.into_iter().flatten().collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let graceful = self.scenario.graceful_ramp_down;
        if tokio::time::timeout(graceful, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(
                ?graceful,
                "iterations still running after the graceful ramp-down, aborting them"
            );
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

async fn run_worker(
    context: Arc<IterationContext>,
    id: usize,
    targets: watch::Receiver<usize>,
    cancel: CancellationToken,
    mut rng: SmallRng,
) {
    tracing::debug!(worker = id, "worker started");
    loop {
        let target = *targets.borrow();
        if id >= target || cancel.is_cancelled() {
            break;
        }
        context.iteration(&mut rng).await;
    }
    tracing::debug!(worker = id, "worker stopped");
}
