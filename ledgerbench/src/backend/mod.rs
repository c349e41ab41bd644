//! Backends that execute the named benchmark functions.
//!
//! The harness never talks to storage directly. Every seed, transaction and teardown step is a
//! call to a named function on a [`Backend`], which answers with a [`FunctionResult`] envelope.
//! [`HttpBackend`] speaks to a deployment over HTTP and [`LocalBackend`] runs the reference store
//! in-process.

use std::fmt::Debug;
use std::sync::Arc;

use ledgerbench_store::protocol::FunctionResult;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result, TransportError};

mod http;
mod local;

pub use http::HttpBackend;
pub use local::LocalBackend;

/// A backend shared between the seeder, the load workers and teardown.
pub type SharedBackend = Arc<dyn Backend>;

/// Executes named functions and returns their result envelopes.
///
/// Implementations return `Ok` for every call that produced an envelope, including function
/// errors. Only failures to obtain an envelope at all are reported as [`TransportError`].
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// A short name used in logs.
    fn name(&self) -> &'static str;

    /// Invokes a read-write function.
    async fn mutation(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError>;

    /// Invokes a read-only function.
    async fn query(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError>;
}

/// Invokes a mutation and decodes its return value.
pub async fn mutate<T: DeserializeOwned>(
    backend: &dyn Backend,
    path: &str,
    args: Value,
) -> Result<T> {
    let result = backend.mutation(path, args).await?;
    decode(path, result)
}

/// Invokes a query and decodes its return value.
pub async fn query<T: DeserializeOwned>(
    backend: &dyn Backend,
    path: &str,
    args: Value,
) -> Result<T> {
    let result = backend.query(path, args).await?;
    decode(path, result)
}

fn decode<T: DeserializeOwned>(path: &str, result: FunctionResult) -> Result<T> {
    match result {
        FunctionResult::Success { value } => serde_json::from_value(value).map_err(|cause| {
            Error::from(TransportError::Serde {
                path: path.to_owned(),
                cause,
            })
        }),
        FunctionResult::Error {
            error_message,
            error_data,
        } => Err(Error::from_function_error(
            path,
            error_message,
            error_data.map(|data| data.code),
        )),
    }
}
