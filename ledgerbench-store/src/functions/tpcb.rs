use serde::Deserialize;

use super::seed::now_millis;
use crate::error::FunctionError;
use crate::model::{Account, Branch, HistoryRecord, Teller};
use crate::protocol::TransactionValue;
use crate::store::MemoryStore;

#[derive(Debug, Deserialize)]
pub struct TransactionArgs {
    pub aid: i64,
    pub tid: i64,
    pub bid: i64,
    pub delta: i64,
}

fn apply_delta(balance: i64, delta: i64, entity: &str, key: i64) -> Result<i64, FunctionError> {
    balance.checked_add(delta).ok_or_else(|| {
        FunctionError::InvalidArgument(format!(
            "delta {delta} overflows the balance of {entity} {key}"
        ))
    })
}

/// The TPC-B style unit of work.
///
/// Adds `delta` to the account, teller and branch balances and appends a history record. All
/// five steps commit together or not at all.
pub fn tpcb_transaction(
    store: &MemoryStore,
    args: TransactionArgs,
) -> Result<TransactionValue, FunctionError> {
    let TransactionArgs {
        aid,
        tid,
        bid,
        delta,
    } = args;

    store.transact(|tx| {
        let mut account = tx
            .get_by_key::<Account>(aid)
            .ok_or(FunctionError::NotFound {
                entity: "account",
                key: aid,
            })?;
        let abalance = apply_delta(account.value.balance, delta, "account", aid)?;
        account.value.balance = abalance;
        tx.patch(account.id, account.value)?;

        let mut teller = tx
            .get_by_key::<Teller>(tid)
            .ok_or(FunctionError::NotFound {
                entity: "teller",
                key: tid,
            })?;
        teller.value.balance = apply_delta(teller.value.balance, delta, "teller", tid)?;
        tx.patch(teller.id, teller.value)?;

        let mut branch = tx
            .get_by_key::<Branch>(bid)
            .ok_or(FunctionError::NotFound {
                entity: "branch",
                key: bid,
            })?;
        branch.value.balance = apply_delta(branch.value.balance, delta, "branch", bid)?;
        tx.patch(branch.id, branch.value)?;

        tx.insert(HistoryRecord {
            tid,
            bid,
            aid,
            delta,
            mtime: now_millis(),
            account_id: Some(account.id),
            teller_id: Some(teller.id),
            branch_id: Some(branch.id),
        })?;

        Ok(TransactionValue { abalance })
    })
}
