use thiserror::Error;

use crate::model::{DocumentId, Table};

/// Errors that can occur when committing or building a transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document or index entry read by the transaction changed before it could commit.
    #[error("optimistic concurrency conflict on table `{table}`")]
    Conflict { table: Table },

    /// The transaction attempted more writes than a single call may perform.
    #[error("transaction exceeds the limit of {limit} written documents")]
    TooManyWrites { limit: usize },

    /// An insert would violate the unique index of a table.
    #[error("duplicate key {key} in table `{table}`")]
    DuplicateKey { table: Table, key: i64 },

    /// A patch or delete targeted a document that does not exist.
    #[error("document {id} not found in table `{table}`")]
    MissingDocument { table: Table, id: DocumentId },

    /// A patch tried to move a document to another table.
    #[error("document {id} belongs to table `{expected}`, not `{actual}`")]
    TableMismatch {
        id: DocumentId,
        expected: Table,
        actual: Table,
    },
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors returned by the named benchmark functions.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// The transaction backing the call could not commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A document targeted by a transaction does not exist.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: i64 },

    /// A seeding call found a parent document missing.
    #[error("{entity} {key} not found, run {prerequisite} first")]
    DependencyMissing {
        entity: &'static str,
        key: i64,
        prerequisite: &'static str,
    },

    /// The arguments did not match the function's signature.
    #[error("invalid arguments for `{path}`: {cause}")]
    InvalidArgs {
        path: String,
        #[source]
        cause: serde_json::Error,
    },

    /// The arguments were well-formed but out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No function is registered under the requested path.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

impl FunctionError {
    /// Returns the error code sent to clients in `errorData.code`.
    pub fn code(&self) -> Option<&'static str> {
        use crate::protocol::*;

        match self {
            FunctionError::Store(StoreError::Conflict { .. }) => Some(OCC_FAILURE),
            FunctionError::Store(StoreError::TooManyWrites { .. }) => Some(LIMIT_EXCEEDED),
            FunctionError::Store(_) => None,
            FunctionError::NotFound { .. } => Some(NOT_FOUND),
            FunctionError::DependencyMissing { .. } => Some(DEPENDENCY_MISSING),
            FunctionError::InvalidArgs { .. } | FunctionError::InvalidArgument(_) => {
                Some(INVALID_ARGUMENT)
            }
            FunctionError::UnknownFunction(_) => Some(UNKNOWN_FUNCTION),
        }
    }
}
