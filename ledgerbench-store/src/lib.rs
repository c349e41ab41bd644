//! Reference backend for the ledger benchmark.
//!
//! This crate provides an in-memory document store with optimistic concurrency control
//! ([`MemoryStore`]), the named benchmark functions served on top of it ([`Service`]) and an
//! HTTP API speaking the function-call protocol ([`api::router`]).
//!
//! The store holds the four TPC-B style tables (branches, tellers, accounts and history) plus an
//! auxiliary counters table. Every function call runs in a single transaction. When two calls
//! write the same document concurrently, the one committing second fails with an
//! `OptimisticConcurrencyControlFailure` and is expected to be retried by the client.
#![warn(missing_debug_implementations)]

pub mod api;
pub mod error;
pub mod functions;
pub mod model;
pub mod protocol;
pub mod store;

pub use crate::error::{FunctionError, StoreError};
pub use crate::functions::{FunctionKind, Service};
pub use crate::model::Table;
pub use crate::store::{Limits, MemoryStore};
