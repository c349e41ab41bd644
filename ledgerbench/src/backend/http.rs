use std::sync::Arc;
use std::time::Duration;

use ledgerbench_store::protocol::{FunctionCall, FunctionResult, UnavailableBody};
use reqwest::StatusCode;
use serde_json::Value;

use super::Backend;
use crate::error::TransportError;

const USER_AGENT: &str = concat!("ledgerbench/", env!("CARGO_PKG_VERSION"));

/// Calls functions on a deployment through its HTTP function-call API.
///
/// Mutations are posted to `{url}/api/mutation` and queries to `{url}/api/query`.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    url: Arc<str>,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates a backend for the deployment at `url`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|cause| TransportError::Reqwest {
                path: url.to_owned(),
                cause,
            })?;

        Ok(Self {
            url: url.trim_end_matches('/').into(),
            client,
        })
    }

    /// Returns the deployment URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(
        &self,
        endpoint: &str,
        path: &str,
        args: Value,
    ) -> Result<FunctionResult, TransportError> {
        let reqwest_error = |cause| TransportError::Reqwest {
            path: path.to_owned(),
            cause,
        };

        let response = self
            .client
            .post(format!("{}/api/{endpoint}", self.url))
            .json(&FunctionCall::new(path, args))
            .send()
            .await
            .map_err(reqwest_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(reqwest_error)?;
        decode_response(path, status, &body)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn mutation(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError> {
        self.call("mutation", path, args).await
    }

    async fn query(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError> {
        self.call("query", path, args).await
    }
}

/// Interprets a response body as a function result.
///
/// Envelopes are taken as they are, except that only `200` and `503` responses may report an
/// optimistic concurrency conflict. A `503` may also carry a `{code, message}` body, which keeps
/// its code. Any other non-success response becomes a code-less error.
fn decode_response(
    path: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<FunctionResult, TransportError> {
    let unavailable = status == StatusCode::SERVICE_UNAVAILABLE;

    if let Ok(result) = serde_json::from_slice::<FunctionResult>(body) {
        if result.is_occ_failure() && !status.is_success() && !unavailable {
            return Ok(FunctionResult::error(
                format!("HTTP {status}: {}", String::from_utf8_lossy(body).trim()),
                None,
            ));
        }
        return Ok(result);
    }

    if unavailable {
        if let Ok(body) = serde_json::from_slice::<UnavailableBody>(body) {
            let message = if body.message.is_empty() {
                format!("HTTP {status}")
            } else {
                body.message
            };
            return Ok(FunctionResult::error(message, Some(&body.code)));
        }
    }

    if !status.is_success() {
        let text = String::from_utf8_lossy(body);
        return Ok(FunctionResult::error(
            format!("HTTP {status}: {}", text.trim()),
            None,
        ));
    }

    Err(TransportError::Malformed {
        path: path.to_owned(),
        context: format!("HTTP {status} without a function result"),
    })
}
