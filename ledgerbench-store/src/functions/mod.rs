//! Named functions served by the reference backend.
//!
//! Every mutation runs in its own [`Transaction`](crate::store::Transaction), so a call either
//! commits all of its writes or none of them.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::FunctionError;
use crate::protocol::{self, FunctionResult};
use crate::store::MemoryStore;

mod maintenance;
mod seed;
mod tpcb;

/// Whether a function may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Mutation,
    Query,
}

/// Dispatches function calls to the benchmark functions over a [`MemoryStore`].
#[derive(Clone, Debug, Default)]
pub struct Service {
    store: MemoryStore,
}

impl Service {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// The store backing this service.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Invokes a named mutation.
    pub fn mutation(&self, path: &str, args: Value) -> FunctionResult {
        self.call(FunctionKind::Mutation, path, args)
    }

    /// Invokes a named query.
    pub fn query(&self, path: &str, args: Value) -> FunctionResult {
        self.call(FunctionKind::Query, path, args)
    }

    /// Invokes a function and converts its outcome into the wire envelope.
    pub fn call(&self, kind: FunctionKind, path: &str, args: Value) -> FunctionResult {
        match self.dispatch(kind, path, args) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(path, error = %err, "function call failed");
                FunctionResult::error(err.to_string(), err.code())
            }
        }
    }

    fn dispatch(
        &self,
        kind: FunctionKind,
        path: &str,
        args: Value,
    ) -> Result<FunctionResult, FunctionError> {
        let store = &self.store;
        let result = match (kind, path) {
            (FunctionKind::Mutation, protocol::SEED_BRANCHES) => {
                FunctionResult::success(seed::seed_branches(store, parse(path, args)?)?)
            }
            (FunctionKind::Mutation, protocol::SEED_TELLERS) => {
                FunctionResult::success(seed::seed_tellers(store, parse(path, args)?)?)
            }
            (FunctionKind::Mutation, protocol::SEED_ACCOUNT_BATCH) => {
                FunctionResult::success(seed::seed_account_batch(store, parse(path, args)?)?)
            }
            (FunctionKind::Mutation, protocol::SEED_HISTORY) => {
                FunctionResult::success(seed::seed_history(store, parse(path, args)?)?)
            }
            (FunctionKind::Mutation, protocol::TPCB_TRANSACTION) => {
                FunctionResult::success(tpcb::tpcb_transaction(store, parse(path, args)?)?)
            }
            (FunctionKind::Mutation, protocol::CLEAR_TABLE_BATCH) => {
                let args = parse(path, args)?;
                FunctionResult::success(maintenance::clear_table_batch(store, args)?)
            }
            (FunctionKind::Query, protocol::GET_TABLE_COUNTS) => {
                FunctionResult::success(maintenance::table_counts(store))
            }
            (FunctionKind::Query, protocol::GET_TOTAL_BALANCES) => {
                FunctionResult::success(maintenance::total_balances(store))
            }
            _ => return Err(FunctionError::UnknownFunction(path.to_owned())),
        };

        Ok(result)
    }
}

fn parse<T: DeserializeOwned>(path: &str, args: Value) -> Result<T, FunctionError> {
    // Queries without arguments may be called with `null` as well as `{}`.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };

    serde_json::from_value(args).map_err(|cause| FunctionError::InvalidArgs {
        path: path.to_owned(),
        cause,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{Account, Branch, Table, Teller};
    use crate::protocol::{SeedSummary, TableCounts, TotalBalances, TransactionValue};
    use crate::store::Limits;

    fn value<T: DeserializeOwned>(result: FunctionResult) -> T {
        match result {
            FunctionResult::Success { value } => serde_json::from_value(value).unwrap(),
            FunctionResult::Error { error_message, .. } => panic!("call failed: {error_message}"),
        }
    }

    /// Seeds a ledger with `accounts` accounts instead of the full scale.
    fn seeded(scale: i64, accounts: i64) -> Service {
        let service = Service::default();
        value::<SeedSummary>(service.mutation(protocol::SEED_BRANCHES, json!({"scale": scale})));
        value::<SeedSummary>(service.mutation(protocol::SEED_TELLERS, json!({"scale": scale})));
        value::<SeedSummary>(service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 1, "count": accounts, "scale": scale}),
        ));
        service
    }

    #[test]
    fn seed_branches_is_idempotent() {
        let service = Service::default();

        let first: SeedSummary =
            value(service.mutation(protocol::SEED_BRANCHES, json!({"scale": 3})));
        assert_eq!(
            first,
            SeedSummary {
                seeded: 3,
                skipped: false
            }
        );

        let second: SeedSummary =
            value(service.mutation(protocol::SEED_BRANCHES, json!({"scale": 3})));
        assert_eq!(
            second,
            SeedSummary {
                seeded: 0,
                skipped: true
            }
        );
        assert_eq!(service.store().count(Table::Branches), 3);
    }

    #[test]
    fn seed_tellers_requires_branches() {
        let service = Service::default();
        let result = service.mutation(protocol::SEED_TELLERS, json!({"scale": 2}));
        assert_eq!(result.error_code(), Some(protocol::DEPENDENCY_MISSING));
        assert_eq!(service.store().count(Table::Tellers), 0);
    }

    #[test]
    fn seed_tellers_numbers_per_branch() {
        let service = seeded(2, 0);
        assert_eq!(service.store().count(Table::Tellers), 20);

        let teller = service.store().get::<Teller>(15).unwrap().value;
        assert_eq!(teller.bid, 2);
        let branch = service.store().get::<Branch>(2).unwrap();
        assert_eq!(teller.branch_id, branch.id);
    }

    #[test]
    fn account_batch_assigns_branches_round_robin() {
        let service = seeded(3, 0);
        let summary: SeedSummary = value(service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 1, "count": 30, "scale": 3}),
        ));
        assert_eq!(summary.seeded, 30);

        for aid in 1..=30 {
            let account = service.store().get::<Account>(aid).unwrap().value;
            assert_eq!(account.bid, ((aid - 1) % 3) + 1);
            assert_eq!(account.balance, 0);
        }

        // The same batch again is detected through its first account and skipped.
        let again: SeedSummary = value(service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 1, "count": 30, "scale": 3}),
        ));
        assert!(again.skipped);
        assert_eq!(service.store().count(Table::Accounts), 30);
    }

    #[test]
    fn account_batch_requires_branches() {
        let service = Service::default();
        let result = service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 1, "count": 10, "scale": 1}),
        );
        assert_eq!(result.error_code(), Some(protocol::DEPENDENCY_MISSING));
    }

    #[test]
    fn oversized_batch_hits_write_limit() {
        let service = Service::new(MemoryStore::with_limits(Limits { max_writes: 100 }));
        value::<SeedSummary>(service.mutation(protocol::SEED_BRANCHES, json!({"scale": 1})));

        let result = service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 1, "count": 101, "scale": 1}),
        );
        assert_eq!(result.error_code(), Some(protocol::LIMIT_EXCEEDED));
        assert_eq!(service.store().count(Table::Accounts), 0);
    }

    #[test]
    fn transaction_applies_delta_everywhere() {
        let service = seeded(1, 10);

        let result: TransactionValue = value(service.mutation(
            protocol::TPCB_TRANSACTION,
            json!({"aid": 1, "tid": 3, "bid": 1, "delta": 100}),
        ));
        assert_eq!(result.abalance, 100);

        let result: TransactionValue = value(service.mutation(
            protocol::TPCB_TRANSACTION,
            json!({"aid": 1, "tid": 4, "bid": 1, "delta": -30}),
        ));
        assert_eq!(result.abalance, 70);

        let balances: TotalBalances =
            value(service.query(protocol::GET_TOTAL_BALANCES, json!({})));
        assert_eq!(
            balances,
            TotalBalances {
                branch_total: 70,
                teller_total: 70,
                account_total: 70,
            }
        );
        assert_eq!(service.store().count(Table::History), 2);
    }

    #[test]
    fn transaction_with_missing_teller_writes_nothing() {
        let service = seeded(1, 10);

        let result = service.mutation(
            protocol::TPCB_TRANSACTION,
            json!({"aid": 1, "tid": 11, "bid": 1, "delta": 100}),
        );
        assert_eq!(result.error_code(), Some(protocol::NOT_FOUND));
        assert_eq!(service.store().get::<Account>(1).unwrap().value.balance, 0);
        assert_eq!(service.store().count(Table::History), 0);
    }

    #[test]
    fn seed_history_samples_accounts() {
        let service = seeded(1, 5);
        let summary: serde_json::Value =
            value(service.mutation(protocol::SEED_HISTORY, json!({"count": 50})));
        assert_eq!(summary, json!({"seeded": 50}));
        assert_eq!(service.store().count(Table::History), 50);
    }

    #[test]
    fn seed_history_draws_tellers_from_seeded_range() {
        let service = seeded(2, 5);
        let summary: serde_json::Value =
            value(service.mutation(protocol::SEED_HISTORY, json!({"count": 200})));
        assert_eq!(summary, json!({"seeded": 200}));

        let mut tx = service.store().begin();
        let history = tx.scan::<crate::model::HistoryRecord>(usize::MAX);
        assert_eq!(history.len(), 200);
        assert!(history.iter().all(|doc| (1..=20).contains(&doc.value.tid)));
    }

    #[test]
    fn overflowing_arguments_are_rejected() {
        let service = seeded(1, 10);

        let result = service.mutation(
            protocol::SEED_ACCOUNT_BATCH,
            json!({"startAid": 2, "count": i64::MAX, "scale": 1}),
        );
        assert_eq!(result.error_code(), Some(protocol::INVALID_ARGUMENT));

        let result: TransactionValue = value(service.mutation(
            protocol::TPCB_TRANSACTION,
            json!({"aid": 1, "tid": 1, "bid": 1, "delta": i64::MAX}),
        ));
        assert_eq!(result.abalance, i64::MAX);

        let result = service.mutation(
            protocol::TPCB_TRANSACTION,
            json!({"aid": 1, "tid": 2, "bid": 1, "delta": 1}),
        );
        assert_eq!(result.error_code(), Some(protocol::INVALID_ARGUMENT));
        assert_eq!(service.store().get::<Account>(1).unwrap().value.balance, i64::MAX);
        assert_eq!(service.store().count(Table::History), 1);
    }

    #[test]
    fn seed_history_without_accounts_fails() {
        let service = Service::default();
        let result = service.mutation(protocol::SEED_HISTORY, json!({"count": 5}));
        assert_eq!(result.error_code(), Some(protocol::DEPENDENCY_MISSING));
    }

    #[test]
    fn clear_table_batch_empties_in_chunks() {
        let service = seeded(1, 25);

        let mut calls = 0;
        loop {
            let summary: protocol::ClearSummary = value(service.mutation(
                protocol::CLEAR_TABLE_BATCH,
                json!({"table": "accounts", "limit": 10}),
            ));
            calls += 1;
            assert_eq!(summary.table, "accounts");
            if summary.deleted < 10 {
                assert_eq!(summary.deleted, 5);
                break;
            }
        }
        assert_eq!(calls, 3);

        let counts: TableCounts = value(service.query(protocol::GET_TABLE_COUNTS, json!({})));
        assert_eq!(counts.accounts, 0);
        assert_eq!(counts.tellers, 10);
    }

    #[test]
    fn clearing_an_empty_table_is_not_an_error() {
        let service = Service::default();
        let summary: protocol::ClearSummary = value(service.mutation(
            protocol::CLEAR_TABLE_BATCH,
            json!({"table": "counters", "limit": 100}),
        ));
        assert_eq!(summary.deleted, 0);
    }

    #[test]
    fn rejects_unknown_functions_and_bad_args() {
        let service = Service::default();

        let result = service.mutation("benchmark:dropEverything", json!({}));
        assert_eq!(result.error_code(), Some(protocol::UNKNOWN_FUNCTION));

        // queries are not callable as mutations
        let result = service.mutation(protocol::GET_TABLE_COUNTS, json!({}));
        assert_eq!(result.error_code(), Some(protocol::UNKNOWN_FUNCTION));

        let result = service.mutation(protocol::SEED_BRANCHES, json!({"scale": "ten"}));
        assert_eq!(result.error_code(), Some(protocol::INVALID_ARGUMENT));

        let result = service.mutation(protocol::SEED_BRANCHES, json!({"scale": 0}));
        assert_eq!(result.error_code(), Some(protocol::INVALID_ARGUMENT));

        let result = service.mutation(
            protocol::CLEAR_TABLE_BATCH,
            json!({"table": "ledgers", "limit": 1}),
        );
        assert_eq!(result.error_code(), Some(protocol::INVALID_ARGUMENT));
    }
}
