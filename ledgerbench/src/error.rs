use ledgerbench_store::protocol;
use thiserror::Error;

/// Failures to exchange a function call with the backend at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client failed to send the request or to receive the response.
    #[error("request to `{path}` failed")]
    Reqwest {
        path: String,
        #[source]
        cause: reqwest::Error,
    },

    /// The response could not be interpreted as a function result.
    #[error("malformed response from `{path}`: {context}")]
    Malformed { path: String, context: String },

    /// The value returned by a successful call did not have the expected shape.
    #[error("unexpected value returned by `{path}`")]
    Serde {
        path: String,
        #[source]
        cause: serde_json::Error,
    },
}

/// Errors returned by the harness when calling backend functions.
///
/// Function errors are classified by the `errorData.code` the backend attaches to them.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced branch, teller or account does not exist.
    #[error("`{path}`: {message}")]
    DependencyMissing { path: String, message: String },

    /// The backend detected a write-write conflict. The call may be retried.
    #[error("`{path}`: optimistic concurrency conflict: {message}")]
    Conflict { path: String, message: String },

    /// Any other failure reported by the backend.
    #[error("`{path}` failed: {message}")]
    Backend {
        path: String,
        message: String,
        code: Option<String>,
    },

    /// The call did not produce a usable response.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Classifies an error envelope returned by the backend.
    pub fn from_function_error(path: &str, message: String, code: Option<String>) -> Self {
        let path = path.to_owned();
        match code.as_deref() {
            Some(protocol::OCC_FAILURE) => Error::Conflict { path, message },
            Some(protocol::NOT_FOUND | protocol::DEPENDENCY_MISSING) => {
                Error::DependencyMissing { path, message }
            }
            _ => Error::Backend {
                path,
                message,
                code,
            },
        }
    }

    /// Returns `true` for transient conflicts that are worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
