use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::FunctionError;
use crate::model::{Account, Branch, HistoryRecord, TELLERS_PER_BRANCH, Teller, round_robin_branch};
use crate::protocol::SeedSummary;
use crate::store::MemoryStore;

/// Maximum number of accounts sampled when seeding history.
const HISTORY_SAMPLE: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ScaleArgs {
    pub scale: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBatchArgs {
    pub start_aid: i64,
    pub count: i64,
    pub scale: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryArgs {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct HistorySummary {
    pub seeded: u64,
}

fn validate_scale(scale: i64) -> Result<(), FunctionError> {
    if scale < 1 {
        return Err(FunctionError::InvalidArgument(format!(
            "scale must be at least 1, got {scale}"
        )));
    }
    Ok(())
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Creates branches `1..=scale`, unless branch 1 already exists.
pub fn seed_branches(store: &MemoryStore, args: ScaleArgs) -> Result<SeedSummary, FunctionError> {
    validate_scale(args.scale)?;

    store.transact(|tx| {
        if tx.get_by_key::<Branch>(1).is_some() {
            tracing::info!("branches already seeded, skipping");
            return Ok(SeedSummary {
                seeded: 0,
                skipped: true,
            });
        }

        for bid in 1..=args.scale {
            tx.insert(Branch { bid, balance: 0 })?;
        }

        Ok(SeedSummary {
            seeded: args.scale as u64,
            skipped: false,
        })
    })
}

/// Creates ten tellers per branch, unless teller 1 already exists.
pub fn seed_tellers(store: &MemoryStore, args: ScaleArgs) -> Result<SeedSummary, FunctionError> {
    validate_scale(args.scale)?;

    store.transact(|tx| {
        if tx.get_by_key::<Teller>(1).is_some() {
            tracing::info!("tellers already seeded, skipping");
            return Ok(SeedSummary {
                seeded: 0,
                skipped: true,
            });
        }

        let mut seeded = 0;
        for bid in 1..=args.scale {
            let branch = tx.get_by_key::<Branch>(bid).ok_or(
                FunctionError::DependencyMissing {
                    entity: "branch",
                    key: bid,
                    prerequisite: "seedBranches",
                },
            )?;

            for t in 1..=TELLERS_PER_BRANCH {
                tx.insert(Teller {
                    tid: (bid - 1) * TELLERS_PER_BRANCH + t,
                    bid,
                    branch_id: branch.id,
                    balance: 0,
                })?;
                seeded += 1;
            }
        }

        Ok(SeedSummary {
            seeded,
            skipped: false,
        })
    })
}

/// Creates accounts `startAid..startAid+count`, unless the first of them already exists.
pub fn seed_account_batch(
    store: &MemoryStore,
    args: AccountBatchArgs,
) -> Result<SeedSummary, FunctionError> {
    validate_scale(args.scale)?;
    let end_aid = args
        .start_aid
        .checked_add(args.count)
        .filter(|_| args.start_aid >= 1 && args.count >= 0)
        .ok_or_else(|| {
            FunctionError::InvalidArgument(format!(
                "invalid account range: start {} count {}",
                args.start_aid, args.count
            ))
        })?;

    store.transact(|tx| {
        if tx.get_by_key::<Account>(args.start_aid).is_some() {
            tracing::info!(start_aid = args.start_aid, "account batch exists, skipping");
            return Ok(SeedSummary {
                seeded: 0,
                skipped: true,
            });
        }

        let branches: HashMap<_, _> = tx
            .scan::<Branch>(usize::MAX)
            .into_iter()
            .map(|doc| (doc.value.bid, doc.id))
            .collect();

        let mut seeded = 0;
        for aid in args.start_aid..end_aid {
            let bid = round_robin_branch(aid, args.scale);
            let branch_id = *branches
                .get(&bid)
                .ok_or(FunctionError::DependencyMissing {
                    entity: "branch",
                    key: bid,
                    prerequisite: "seedBranches",
                })?;

            tx.insert(Account {
                aid,
                bid,
                branch_id,
                balance: 0,
            })?;
            seeded += 1;
        }

        Ok(SeedSummary {
            seeded,
            skipped: false,
        })
    })
}

/// Inserts `count` history records referencing a sample of existing accounts.
pub fn seed_history(
    store: &MemoryStore,
    args: HistoryArgs,
) -> Result<HistorySummary, FunctionError> {
    let count = usize::try_from(args.count).map_err(|_| {
        FunctionError::InvalidArgument(format!("count must not be negative, got {}", args.count))
    })?;

    store.transact(|tx| {
        let tellers = tx.scan::<Teller>(usize::MAX).len().max(1) as i64;
        let accounts = tx.scan::<Account>(count.min(HISTORY_SAMPLE));
        if accounts.is_empty() && count > 0 {
            return Err(FunctionError::DependencyMissing {
                entity: "account",
                key: 1,
                prerequisite: "seedAccountBatch",
            });
        }

        let mut rng = rand::rng();
        for i in 0..count {
            let account = &accounts[i % accounts.len()];
            tx.insert(HistoryRecord {
                tid: rng.random_range(1..=tellers),
                bid: account.value.bid,
                aid: account.value.aid,
                delta: rng.random_range(-500..=500),
                mtime: now_millis(),
                account_id: Some(account.id),
                teller_id: None,
                branch_id: Some(account.value.branch_id),
            })?;
        }

        Ok(HistorySummary {
            seeded: count as u64,
        })
    })
}
