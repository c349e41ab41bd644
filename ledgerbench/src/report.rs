//! Threshold evaluation and the end-of-run summary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use yansi::Paint;

use crate::driver::LoadSummary;
use crate::metrics::Snapshot;

/// Pass criteria of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "profile", rename_all = "lowercase")]
pub enum Thresholds {
    /// Failure rate below 10% and a p95 latency below one second.
    #[default]
    Default,
    /// Failure rate below 1% and a p95 latency below 200ms.
    Strict,
    Custom {
        max_failure_rate: f64,
        #[serde(with = "humantime_serde")]
        max_p95: Duration,
    },
}

/// Concrete limits of a [`Thresholds`] profile. Both limits are exclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdLimits {
    pub max_failure_rate: f64,
    pub max_p95: Duration,
}

impl Thresholds {
    pub fn limits(&self) -> ThresholdLimits {
        match *self {
            Thresholds::Default => ThresholdLimits {
                max_failure_rate: 0.1,
                max_p95: Duration::from_secs(1),
            },
            Thresholds::Strict => ThresholdLimits {
                max_failure_rate: 0.01,
                max_p95: Duration::from_millis(200),
            },
            Thresholds::Custom {
                max_failure_rate,
                max_p95,
            } => ThresholdLimits {
                max_failure_rate,
                max_p95,
            },
        }
    }
}

/// Result of checking one threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub metric: &'static str,
    pub condition: String,
    pub observed: String,
    pub passed: bool,
}

impl ThresholdLimits {
    /// Checks the metrics against both limits. Runs without any transactions pass.
    pub fn evaluate(&self, metrics: &Snapshot) -> Vec<Verdict> {
        let rate = metrics.failure_rate();
        let p95 = metrics.quantile(0.95);

        vec![
            Verdict {
                metric: "failed_requests",
                condition: format!("rate<{}", self.max_failure_rate),
                observed: format!("{rate:.4}"),
                passed: rate < self.max_failure_rate,
            },
            Verdict {
                metric: "tx_trend",
                condition: format!("p(95)<{:?}", self.max_p95),
                observed: p95.map_or_else(|| "n/a".to_owned(), |p95| format!("{p95:.2?}")),
                passed: p95.is_none_or(|p95| p95 < self.max_p95),
            },
        ]
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct Report {
    pub test_run: String,
    pub load: LoadSummary,
    pub metrics: Snapshot,
    pub verdicts: Vec<Verdict>,
}

impl Report {
    pub fn new(
        test_run: String,
        load: LoadSummary,
        metrics: Snapshot,
        thresholds: &Thresholds,
    ) -> Self {
        let verdicts = thresholds.limits().evaluate(&metrics);
        Self {
            test_run,
            load,
            metrics,
            verdicts,
        }
    }

    /// Returns `true` if every threshold held.
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|verdict| verdict.passed)
    }

    /// Prints the summary to stdout.
    pub fn print(&self) {
        let metrics = &self.metrics;

        println!();
        println!(
            "{} {} ({:.2?}, {} iterations, {} workers)",
            "## Run".bold(),
            self.test_run.bold().blue(),
            self.load.duration,
            self.load.iterations.bold(),
            self.load.workers
        );

        print!(
            "{} ({} ops",
            "TRANSACTIONS:".bold().green(),
            metrics.transactions().bold()
        );
        if metrics.failed > 0 {
            print!(
                ", {}",
                format!("{} FAILURES", metrics.failed).bold().red()
            );
        }
        println!(")");

        let seconds = self.load.duration.as_secs_f64().max(f64::EPSILON);
        let ops_ps = metrics.transactions() as f64 / seconds;
        println!(
            "  {:.2} operations/s; {} retries; {} exhausted",
            ops_ps.bold(),
            metrics.retries,
            metrics.exhausted
        );
        if let (Some(avg), Some(p50), Some(p90), Some(p95), Some(p99), Some(max)) = (
            metrics.mean(),
            metrics.quantile(0.5),
            metrics.quantile(0.9),
            metrics.quantile(0.95),
            metrics.quantile(0.99),
            metrics.max(),
        ) {
            println!(
                "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p95: {p95:.2?}; p99: {p99:.2?}; max: {max:.2?}",
                avg.bold()
            );
        }

        println!();
        println!("{}", "## THRESHOLDS".bold());
        for verdict in &self.verdicts {
            let mark = if verdict.passed {
                "✓".green()
            } else {
                "✗".red()
            };
            println!(
                "  {mark} {} {} (observed {})",
                verdict.metric.bold(),
                verdict.condition,
                verdict.observed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Failure;
    use crate::metrics::Metrics;

    fn snapshot(succeeded: u64, exhausted: u64, latency: Duration) -> Snapshot {
        let metrics = Metrics::default();
        for _ in 0..succeeded {
            metrics.record_success();
            metrics.record_latency(latency);
        }
        for _ in 0..exhausted {
            metrics.record_failure(&Failure::RetriesExhausted { attempts: 5 });
            metrics.record_latency(latency);
        }
        metrics.snapshot()
    }

    #[test]
    fn profiles() {
        assert_eq!(
            Thresholds::Default.limits(),
            ThresholdLimits {
                max_failure_rate: 0.1,
                max_p95: Duration::from_secs(1)
            }
        );
        assert_eq!(
            Thresholds::Strict.limits(),
            ThresholdLimits {
                max_failure_rate: 0.01,
                max_p95: Duration::from_millis(200)
            }
        );
    }

    #[test]
    fn healthy_run_passes() {
        let metrics = snapshot(99, 1, Duration::from_millis(20));
        let verdicts = Thresholds::Default.limits().evaluate(&metrics);
        assert!(verdicts.iter().all(|verdict| verdict.passed), "{verdicts:?}");
    }

    #[test]
    fn limits_are_exclusive() {
        // Exactly 10% failures does not satisfy `rate<0.1`.
        let metrics = snapshot(9, 1, Duration::from_millis(20));
        let verdicts = Thresholds::Default.limits().evaluate(&metrics);
        assert!(!verdicts[0].passed);
        assert!(verdicts[1].passed);
    }

    #[test]
    fn slow_run_fails_strict() {
        let metrics = snapshot(100, 0, Duration::from_millis(500));
        let verdicts = Thresholds::Strict.limits().evaluate(&metrics);
        assert!(verdicts[0].passed);
        assert!(!verdicts[1].passed);
        assert!(Thresholds::Default.limits().evaluate(&metrics)[1].passed);
    }

    #[test]
    fn empty_run_passes() {
        let metrics = Metrics::default().snapshot();
        let report = Report::new(
            "empty".into(),
            LoadSummary {
                duration: Duration::ZERO,
                iterations: 0,
                workers: 0,
            },
            metrics,
            &Thresholds::Strict,
        );
        assert!(report.passed());
    }
}
