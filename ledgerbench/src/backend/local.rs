use ledgerbench_store::Service;
use ledgerbench_store::protocol::FunctionResult;
use serde_json::Value;

use super::Backend;
use crate::error::TransportError;

/// Runs the benchmark functions against an in-process reference store.
#[derive(Clone, Debug, Default)]
pub struct LocalBackend {
    service: Service,
}

impl LocalBackend {
    /// Wraps an existing service, so that callers can inspect its store afterwards.
    pub fn new(service: Service) -> Self {
        Self { service }
    }

    /// Returns the service backing this backend.
    pub fn service(&self) -> &Service {
        &self.service
    }
}

#[async_trait::async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn mutation(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError> {
        // Calls complete synchronously. Yield so that load workers cannot starve the controller.
        tokio::task::yield_now().await;
        Ok(self.service.mutation(path, args))
    }

    async fn query(&self, path: &str, args: Value) -> Result<FunctionResult, TransportError> {
        tokio::task::yield_now().await;
        Ok(self.service.query(path, args))
    }
}
