//! Idempotent population of the benchmark tables.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ledgerbench_store::protocol::{self, SeedSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::{self, SharedBackend};
use crate::error::Result;
use crate::scale::{AccountBatch, ScaleModel};

/// Sizes of the seeding calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedingConfig {
    /// Accounts inserted per `seedAccountBatch` call.
    pub account_batch_size: u64,
    /// History records inserted once accounts and tellers exist. `0` skips history seeding.
    pub history_records: u64,
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self {
            account_batch_size: 5000,
            history_records: 10_000,
        }
    }
}

/// Result of a complete seeding pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub branches: SeedSummary,
    pub tellers: SeedSummary,
    /// Number of accounts inserted. Batches that already existed are not counted.
    pub accounts: u64,
    /// Number of history records inserted, or `None` if history seeding failed.
    pub history: Option<u64>,
}

/// Populates branches, tellers, accounts and history for a scale factor.
///
/// Each step is idempotent: calling it against already seeded tables inserts nothing and reports
/// the step as skipped.
#[derive(Debug)]
pub struct Seeder {
    backend: SharedBackend,
    config: SeedingConfig,
}

impl Seeder {
    pub fn new(backend: SharedBackend, config: SeedingConfig) -> Self {
        Self { backend, config }
    }

    pub async fn seed_branches(&self, scale: &ScaleModel) -> Result<SeedSummary> {
        backend::mutate(
            &*self.backend,
            protocol::SEED_BRANCHES,
            json!({ "scale": scale.scale() }),
        )
        .await
    }

    /// Seeds tellers. Fails with [`Error::DependencyMissing`](crate::error::Error) when the
    /// branches do not exist yet.
    pub async fn seed_tellers(&self, scale: &ScaleModel) -> Result<SeedSummary> {
        backend::mutate(
            &*self.backend,
            protocol::SEED_TELLERS,
            json!({ "scale": scale.scale() }),
        )
        .await
    }

    pub async fn seed_account_batch(
        &self,
        batch: AccountBatch,
        scale: &ScaleModel,
    ) -> Result<SeedSummary> {
        backend::mutate(
            &*self.backend,
            protocol::SEED_ACCOUNT_BATCH,
            json!({
                "startAid": batch.start_aid,
                "count": batch.count,
                "scale": scale.scale(),
            }),
        )
        .await
    }

    /// Seeds all accounts batch by batch, returning the number of inserted accounts.
    pub async fn seed_accounts(&self, scale: &ScaleModel) -> Result<u64> {
        let batches: Vec<_> = scale
            .account_batches(self.config.account_batch_size)
            .collect();

        let style = ProgressStyle::with_template("{msg}\n{wide_bar} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::new(scale.accounts() as u64)
            .with_message("Seeding accounts...")
            .with_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        let mut seeded = 0;
        for (index, batch) in batches.iter().enumerate() {
            let summary = match self.seed_account_batch(*batch, scale).await {
                Ok(summary) => summary,
                Err(error) => {
                    bar.abandon();
                    return Err(error);
                }
            };

            seeded += summary.seeded;
            bar.inc(batch.count as u64);

            let done = index + 1;
            if done % 10 == 0 || done == batches.len() {
                tracing::info!(
                    accounts = batch.end_aid(),
                    total = scale.accounts(),
                    "accounts progress: {}%",
                    batch.end_aid() * 100 / scale.accounts()
                );
            }
        }

        bar.finish_and_clear();
        Ok(seeded)
    }

    /// Inserts `count` history records referencing existing accounts and tellers.
    pub async fn seed_history(&self, count: u64) -> Result<u64> {
        #[derive(Deserialize)]
        struct HistorySummary {
            seeded: u64,
        }

        let summary: HistorySummary = backend::mutate(
            &*self.backend,
            protocol::SEED_HISTORY,
            json!({ "count": count }),
        )
        .await?;
        Ok(summary.seeded)
    }

    /// Runs all seeding steps in dependency order.
    ///
    /// Failures in branches, tellers or accounts abort seeding. A failure to seed history is
    /// only logged.
    pub async fn seed(&self, scale: &ScaleModel) -> Result<SeedReport> {
        tracing::info!(
            backend = self.backend.name(),
            scale = scale.scale(),
            "seeding benchmark tables"
        );

        let branches = self.seed_branches(scale).await?;
        tracing::info!(seeded = branches.seeded, skipped = branches.skipped, "branches");

        let tellers = self.seed_tellers(scale).await?;
        tracing::info!(seeded = tellers.seeded, skipped = tellers.skipped, "tellers");

        let accounts = self.seed_accounts(scale).await?;
        tracing::info!(seeded = accounts, "accounts");

        let history = match self.config.history_records {
            0 => Some(0),
            count => match self.seed_history(count).await {
                Ok(seeded) => {
                    tracing::info!(seeded, "history");
                    Some(seeded)
                }
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to seed history, continuing without it"
                    );
                    None
                }
            },
        };

        Ok(SeedReport {
            branches,
            tellers,
            accounts,
            history,
        })
    }
}
