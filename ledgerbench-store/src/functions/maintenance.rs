use serde::Deserialize;

use crate::error::{FunctionError, StoreError};
use crate::model::{Account, Branch, Counter, Entity, HistoryRecord, Table, Teller};
use crate::protocol::{ClearSummary, TableCounts, TotalBalances};
use crate::store::{MemoryStore, Transaction};

#[derive(Debug, Deserialize)]
pub struct ClearArgs {
    pub table: Table,
    pub limit: usize,
}

fn delete_some<E: Entity>(tx: &mut Transaction, limit: usize) -> Result<u64, StoreError> {
    let docs = tx.scan::<E>(limit);
    for doc in &docs {
        tx.delete(E::TABLE, doc.id)?;
    }
    Ok(docs.len() as u64)
}

/// Deletes up to `limit` documents from a table.
pub fn clear_table_batch(
    store: &MemoryStore,
    args: ClearArgs,
) -> Result<ClearSummary, FunctionError> {
    let ClearArgs { table, limit } = args;

    let deleted = store.transact(|tx| match table {
        Table::Branches => delete_some::<Branch>(tx, limit),
        Table::Tellers => delete_some::<Teller>(tx, limit),
        Table::Accounts => delete_some::<Account>(tx, limit),
        Table::History => delete_some::<HistoryRecord>(tx, limit),
        Table::Counters => delete_some::<Counter>(tx, limit),
    })?;

    tracing::debug!(%table, deleted, "cleared table batch");
    Ok(ClearSummary {
        deleted,
        table: table.as_str().to_owned(),
    })
}

pub fn table_counts(store: &MemoryStore) -> TableCounts {
    let count = |table| store.count(table) as u64;
    TableCounts {
        branches: count(Table::Branches),
        tellers: count(Table::Tellers),
        accounts: count(Table::Accounts),
        history: count(Table::History),
        counters: count(Table::Counters),
    }
}

pub fn total_balances(store: &MemoryStore) -> TotalBalances {
    // A read-only transaction; it is dropped rather than committed.
    let mut tx = store.begin();
    TotalBalances {
        branch_total: tx
            .scan::<Branch>(usize::MAX)
            .iter()
            .map(|doc| doc.value.balance)
            .sum(),
        teller_total: tx
            .scan::<Teller>(usize::MAX)
            .iter()
            .map(|doc| doc.value.balance)
            .sum(),
        account_total: tx
            .scan::<Account>(usize::MAX)
            .iter()
            .map(|doc| doc.value.balance)
            .sum(),
    }
}
