//! Load benchmark for transactional ledger backends.
//!
//! The harness drives a TPC-B style workload against a backend that exposes a small set of named
//! functions. A run has three phases:
//!
//! 1. **Setup**: the [`Seeder`] populates branches, tellers, accounts and history for the
//!    configured scale factor. Seeding is idempotent, so an interrupted setup can be resumed.
//! 2. **Load**: the [`LoadDriver`] ramps a pool of workers up and down according to a
//!    [`Scenario`]. Each worker runs iterations of random ledger transactions through the
//!    [`TransactionExecutor`], which retries optimistic concurrency conflicts with bounded
//!    exponential backoff.
//! 3. **Teardown**: [`Teardown`] deletes all benchmark data in bounded batches.
//!
//! Afterwards the collected metrics are checked against the configured thresholds and printed as
//! a [`Report`].
#![warn(missing_debug_implementations)]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use crate::backend::{Backend, HttpBackend, LocalBackend, SharedBackend};
pub use crate::config::Config;
pub use crate::driver::{LoadDriver, Scenario, Stage};
pub use crate::error::{Error, TransportError};
pub use crate::executor::{Outcome, RetryPolicy, TransactionExecutor};
pub use crate::metrics::Metrics;
pub use crate::report::{Report, Thresholds};
pub use crate::scale::{ScaleModel, TransactionParams};
pub use crate::seeder::Seeder;
pub use crate::teardown::Teardown;

pub mod backend;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observability;
pub mod report;
pub mod scale;
pub mod seeder;
pub mod teardown;

/// Runs setup, load and teardown against `backend`.
///
/// A failing setup aborts the run before any transaction is attempted and skips teardown.
/// Teardown runs after every load phase, including a cancelled one. Its failures are logged and
/// do not affect the returned report.
#[tracing::instrument(skip_all, fields(test_run = %config.test_run))]
pub async fn run(
    backend: SharedBackend,
    config: &Config,
    cancel: CancellationToken,
) -> Result<Report, Error> {
    let scale = config.scale();

    Seeder::new(Arc::clone(&backend), config.seeding)
        .seed(&scale)
        .await?;

    let metrics = Arc::new(Metrics::default());
    let executor =
        TransactionExecutor::new(Arc::clone(&backend), config.retry, Arc::clone(&metrics));
    let load = LoadDriver::new(executor, scale, config.scenario())
        .requests_per_iteration(config.requests)
        .iteration_budget(config.load.iteration_budget)
        .seed(config.seed)
        .run(cancel)
        .await;

    let snapshot = metrics.snapshot();
    tracing::info!(
        transactions = snapshot.transactions(),
        failed = snapshot.failed,
        retries = snapshot.retries,
        "load finished"
    );

    match Teardown::new(backend, config.teardown).run().await {
        Ok(summary) => tracing::info!(deleted = summary.total(), "teardown finished"),
        Err(error) => tracing::error!(
            error = &error as &dyn std::error::Error,
            "teardown failed, benchmark data may remain"
        ),
    }

    Ok(Report::new(
        config.test_run.clone(),
        load,
        snapshot,
        &config.thresholds,
    ))
}
