//! Wire format of the function-call protocol.
//!
//! Clients invoke named functions by posting a [`FunctionCall`] to `/api/mutation` or
//! `/api/query`. The response is a [`FunctionResult`], tagged by its `status` field:
//!
//! ```json
//! {"status": "success", "value": {"abalance": 100}}
//! {"status": "error", "errorMessage": "...", "errorData": {"code": "NotFound"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code signalling a write-write conflict detected at commit time.
pub const OCC_FAILURE: &str = "OptimisticConcurrencyControlFailure";
/// Error code for a transaction whose target account, teller or branch does not exist.
pub const NOT_FOUND: &str = "NotFound";
/// Error code for seeding calls whose parent documents have not been seeded.
pub const DEPENDENCY_MISSING: &str = "DependencyMissing";
/// Error code for calls exceeding the per-call write limit.
pub const LIMIT_EXCEEDED: &str = "LimitExceeded";
/// Error code for malformed arguments.
pub const INVALID_ARGUMENT: &str = "InvalidArgument";
/// Error code for calls to functions that do not exist.
pub const UNKNOWN_FUNCTION: &str = "UnknownFunction";

pub const SEED_BRANCHES: &str = "benchmark:seedBranches";
pub const SEED_TELLERS: &str = "benchmark:seedTellers";
pub const SEED_ACCOUNT_BATCH: &str = "benchmark:seedAccountBatch";
pub const SEED_HISTORY: &str = "benchmark:seedHistory";
pub const TPCB_TRANSACTION: &str = "benchmark:tpcbTransaction";
pub const CLEAR_TABLE_BATCH: &str = "benchmark:clearTableBatch";
pub const GET_TABLE_COUNTS: &str = "benchmark:getTableCounts";
pub const GET_TOTAL_BALANCES: &str = "benchmark:getTotalBalances";

/// Request body of a function call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub path: String,
    pub args: Value,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_owned()
}

impl FunctionCall {
    pub fn new(path: impl Into<String>, args: Value) -> Self {
        Self {
            path: path.into(),
            args,
            format: default_format(),
        }
    }
}

/// Structured data attached to a failed call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
}

/// Response body of a function call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FunctionResult {
    Success {
        #[serde(default)]
        value: Value,
    },
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
        #[serde(
            rename = "errorData",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        error_data: Option<ErrorData>,
    },
}

impl FunctionResult {
    pub fn success(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => FunctionResult::Success { value },
            Err(err) => FunctionResult::error(format!("failed to serialize result: {err}"), None),
        }
    }

    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        FunctionResult::Error {
            error_message: message.into(),
            error_data: code.map(|code| ErrorData {
                code: code.to_owned(),
            }),
        }
    }

    /// Returns the error code of a failed call.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            FunctionResult::Error {
                error_data: Some(data),
                ..
            } => Some(&data.code),
            _ => None,
        }
    }

    /// Returns `true` if the call failed with an optimistic concurrency conflict.
    pub fn is_occ_failure(&self) -> bool {
        self.error_code() == Some(OCC_FAILURE)
    }
}

/// Body of a `503 Service Unavailable` response.
///
/// Overloaded deployments answer with this shape instead of a [`FunctionResult`]. A `code` of
/// [`OCC_FAILURE`] signals a conflict just like the error envelope does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Value of [`SEED_BRANCHES`], [`SEED_TELLERS`] and [`SEED_ACCOUNT_BATCH`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub seeded: u64,
    #[serde(default)]
    pub skipped: bool,
}

/// Value of [`TPCB_TRANSACTION`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionValue {
    pub abalance: i64,
}

/// Value of [`CLEAR_TABLE_BATCH`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSummary {
    pub deleted: u64,
    pub table: String,
}

/// Value of [`GET_TABLE_COUNTS`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub branches: u64,
    pub tellers: u64,
    pub accounts: u64,
    pub history: u64,
    #[serde(default)]
    pub counters: u64,
}

impl TableCounts {
    pub fn total(&self) -> u64 {
        self.branches + self.tellers + self.accounts + self.history + self.counters
    }
}

/// Value of [`GET_TOTAL_BALANCES`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalBalances {
    pub branch_total: i64,
    pub teller_total: i64,
    pub account_total: i64,
}

impl TotalBalances {
    /// Returns `true` if all deltas were applied to accounts, tellers and branches alike.
    pub fn is_consistent(&self) -> bool {
        self.branch_total == self.teller_total && self.teller_total == self.account_total
    }
}
