//! Execution of single ledger transactions with bounded retries on conflicts.

use std::sync::Arc;
use std::time::Duration;

use ledgerbench_store::protocol::{self, TransactionValue};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::{self, SharedBackend};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::scale::TransactionParams;

/// Bounded exponential backoff for optimistic concurrency conflicts.
///
/// The attempt with number `n` that hits a conflict is followed by a pause of
/// `min(base_delay · 2^(n-1), max_delay)`, unless it was the last permitted attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts per transaction, including the first one.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Returns the pause after a conflict on the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Returns the pause before the next attempt, or `None` if `attempt` was the last one.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay(attempt))
    }
}

/// Why a transaction did not commit.
#[derive(Debug)]
pub enum Failure {
    /// Every permitted attempt hit a conflict.
    RetriesExhausted { attempts: u32 },
    /// The backend failed with an error that is not retried.
    Permanent(Error),
}

/// Final result of [`TransactionExecutor::execute`].
#[derive(Debug)]
pub enum Outcome {
    Committed { balance: i64, attempts: u32 },
    Failed { failure: Failure, attempts: u32 },
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }
}

#[derive(Debug)]
enum AttemptState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { balance: i64, attempts: u32 },
    FailedPermanent { failure: Failure, attempts: u32 },
}

impl AttemptState {
    /// Moves on from the result of `attempt`.
    fn after(attempt: u32, result: Result<i64, Error>, policy: &RetryPolicy) -> Self {
        match result {
            Ok(balance) => AttemptState::Succeeded {
                balance,
                attempts: attempt,
            },
            Err(error) if error.is_conflict() => match policy.backoff(attempt) {
                Some(delay) => AttemptState::Retrying { attempt, delay },
                None => AttemptState::FailedPermanent {
                    failure: Failure::RetriesExhausted { attempts: attempt },
                    attempts: attempt,
                },
            },
            Err(error) => AttemptState::FailedPermanent {
                failure: Failure::Permanent(error),
                attempts: attempt,
            },
        }
    }
}

/// Runs ledger transactions against a backend and records their outcome.
#[derive(Clone, Debug)]
pub struct TransactionExecutor {
    backend: SharedBackend,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl TransactionExecutor {
    pub fn new(backend: SharedBackend, policy: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            policy,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Executes one transaction, retrying conflicts according to the retry policy.
    ///
    /// Failures are recorded and logged but never returned as errors, so that a single failed
    /// transaction does not stop the load.
    pub async fn execute(&self, params: TransactionParams) -> Outcome {
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    let result = self.attempt(&params).await;
                    AttemptState::after(attempt, result, &self.policy)
                }
                AttemptState::Retrying { attempt, delay } => {
                    self.metrics.record_retry();
                    tracing::trace!(attempt, ?delay, aid = params.aid, "retrying after conflict");
                    tokio::time::sleep(delay).await;
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Succeeded { balance, attempts } => {
                    self.metrics.record_success();
                    return Outcome::Committed { balance, attempts };
                }
                AttemptState::FailedPermanent { failure, attempts } => {
                    self.metrics.record_failure(&failure);
                    match &failure {
                        Failure::RetriesExhausted { .. } => tracing::warn!(
                            attempts,
                            aid = params.aid,
                            tid = params.tid,
                            bid = params.bid,
                            "transaction failed: retries exhausted"
                        ),
                        Failure::Permanent(error) => tracing::warn!(
                            error = error as &dyn std::error::Error,
                            aid = params.aid,
                            tid = params.tid,
                            bid = params.bid,
                            "transaction failed"
                        ),
                    }
                    return Outcome::Failed { failure, attempts };
                }
            };
        }
    }

    async fn attempt(&self, params: &TransactionParams) -> Result<i64, Error> {
        let args = json!({
            "aid": params.aid,
            "tid": params.tid,
            "bid": params.bid,
            "delta": params.delta,
        });
        let value: TransactionValue =
            backend::mutate(&*self.backend, protocol::TPCB_TRANSACTION, args).await?;
        Ok(value.abalance)
    }
}
