//! Removal of all benchmark data in bounded batches.

use ledgerbench_store::Table;
use ledgerbench_store::protocol::{self, ClearSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::{self, SharedBackend};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownConfig {
    /// Maximum number of documents deleted per call.
    pub batch_size: u64,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self { batch_size: 4000 }
    }
}

/// Number of deleted documents per table, in deletion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub deleted: Vec<(Table, u64)>,
}

impl TeardownSummary {
    pub fn total(&self) -> u64 {
        self.deleted.iter().map(|(_, deleted)| deleted).sum()
    }
}

/// Empties the benchmark tables.
#[derive(Debug)]
pub struct Teardown {
    backend: SharedBackend,
    config: TeardownConfig,
}

impl Teardown {
    pub fn new(backend: SharedBackend, config: TeardownConfig) -> Self {
        Self { backend, config }
    }

    /// Deletes up to `limit` documents from `table`.
    pub async fn clear_table_batch(&self, table: Table, limit: u64) -> Result<u64> {
        let summary: ClearSummary = backend::mutate(
            &*self.backend,
            protocol::CLEAR_TABLE_BATCH,
            json!({ "table": table.as_str(), "limit": limit }),
        )
        .await?;
        Ok(summary.deleted)
    }

    /// Deletes batches from `table` until a batch comes back short.
    pub async fn clear_table(&self, table: Table) -> Result<u64> {
        let limit = self.config.batch_size.max(1);
        let mut total = 0;

        loop {
            let deleted = self.clear_table_batch(table, limit).await?;
            total += deleted;
            if deleted < limit {
                break;
            }
        }

        tracing::debug!(%table, deleted = total, "cleared table");
        Ok(total)
    }

    /// Clears every table, dependents before the tables they reference.
    pub async fn run(&self) -> Result<TeardownSummary> {
        let mut summary = TeardownSummary::default();
        for table in Table::TEARDOWN_ORDER {
            let deleted = self.clear_table(table).await?;
            tracing::info!(%table, deleted, "cleared");
            summary.deleted.push((table, deleted));
        }
        Ok(summary)
    }
}
