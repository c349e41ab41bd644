//! Counters and latency distribution collected during the load phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sketches_ddsketch::DDSketch;

use crate::executor::Failure;

/// Shared metrics sink, updated concurrently by all load workers.
///
/// Every executed transaction is counted exactly once, either as a success or as a failure.
/// Retries are counted separately and do not contribute to the failure rate.
pub struct Metrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    retries: AtomicU64,
    latency: Mutex<DDSketch>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            latency: Mutex::new(DDSketch::default()),
        }
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .field("exhausted", &self.exhausted)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, failure: &Failure) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if matches!(failure, Failure::RetriesExhausted { .. }) {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the wall-clock time of one transaction, including all of its retries.
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(elapsed.as_secs_f64());
    }

    /// Takes a consistent copy of the current values.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            latency: self
                .latency
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Clone)]
pub struct Snapshot {
    /// Transactions that committed.
    pub succeeded: u64,
    /// Transactions that failed permanently, including those that ran out of retries.
    pub failed: u64,
    /// Transactions that failed because every attempt hit a conflict.
    pub exhausted: u64,
    /// Conflicts that were followed by another attempt.
    pub retries: u64,
    latency: DDSketch,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .field("exhausted", &self.exhausted)
            .field("retries", &self.retries)
            .field("p95", &self.quantile(0.95))
            .finish()
    }
}

impl Snapshot {
    /// Total number of executed transactions.
    pub fn transactions(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Share of executed transactions that failed, or `0` if none were executed.
    pub fn failure_rate(&self) -> f64 {
        match self.transactions() {
            0 => 0.0,
            total => self.failed as f64 / total as f64,
        }
    }

    /// Returns the latency at quantile `q`, if any latency was recorded.
    pub fn quantile(&self, q: f64) -> Option<Duration> {
        let value = self.latency.quantile(q).ok().flatten()?;
        Some(Duration::from_secs_f64(value.max(0.0)))
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = self.latency.count();
        let sum = self.latency.sum()?;
        (count > 0).then(|| Duration::from_secs_f64((sum / count as f64).max(0.0)))
    }

    pub fn max(&self) -> Option<Duration> {
        self.latency.max().map(|max| Duration::from_secs_f64(max.max(0.0)))
    }

    /// Number of recorded latency samples.
    pub fn samples(&self) -> usize {
        self.latency.count()
    }
}
