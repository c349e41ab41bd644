//! Table cardinalities and random transaction parameters for a scale factor.

use std::ops::RangeInclusive;

use ledgerbench_store::model::{ACCOUNTS_PER_BRANCH, TELLERS_PER_BRANCH};
use rand::Rng;
use serde::Serialize;

/// Range of the balance change applied by a single transaction.
pub const DELTA_RANGE: RangeInclusive<i64> = -500..=500;

/// Dataset sizes derived from a scale factor.
///
/// A scale factor `s` yields `s` branches, `10·s` tellers and `100 000·s` accounts. Keys of each
/// table are dense and 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleModel {
    scale: i64,
}

impl ScaleModel {
    /// Creates the model for the given scale factor, which must be at least 1.
    pub fn new(scale: u32) -> Self {
        debug_assert!(scale >= 1, "scale factor must be at least 1");
        Self {
            scale: i64::from(scale),
        }
    }

    /// Returns the scale factor.
    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn branches(&self) -> i64 {
        self.scale
    }

    pub fn tellers(&self) -> i64 {
        self.scale * TELLERS_PER_BRANCH
    }

    pub fn accounts(&self) -> i64 {
        self.scale * ACCOUNTS_PER_BRANCH
    }

    /// Draws the parameters of one transaction uniformly from the seeded key ranges.
    ///
    /// The three keys are drawn independently, so the account does not necessarily belong to
    /// the chosen branch.
    pub fn sample(&self, rng: &mut impl Rng) -> TransactionParams {
        TransactionParams {
            aid: rng.random_range(1..=self.accounts()),
            tid: rng.random_range(1..=self.tellers()),
            bid: rng.random_range(1..=self.branches()),
            delta: rng.random_range(DELTA_RANGE),
        }
    }

    /// Splits the account key range into contiguous batches of at most `batch_size` accounts.
    pub fn account_batches(&self, batch_size: u64) -> impl Iterator<Item = AccountBatch> {
        let total = self.accounts();
        let batch_size = i64::try_from(batch_size.max(1)).unwrap_or(i64::MAX);

        (1..=total).step_by(batch_size as usize).map(move |start_aid| AccountBatch {
            start_aid,
            count: batch_size.min(total - start_aid + 1),
        })
    }
}

/// Arguments of one ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TransactionParams {
    pub aid: i64,
    pub tid: i64,
    pub bid: i64,
    pub delta: i64,
}

/// A contiguous range of account keys seeded by a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountBatch {
    pub start_aid: i64,
    pub count: i64,
}

impl AccountBatch {
    /// Returns the last account key of the batch.
    pub fn end_aid(&self) -> i64 {
        self.start_aid + self.count - 1
    }
}
