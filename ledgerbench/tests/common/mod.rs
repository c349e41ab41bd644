//! An in-process HTTP server for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use ledgerbench::{HttpBackend, SharedBackend};
use ledgerbench_store::Service;

/// Serves a router on a random port on localhost until dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestServer {
    /// Serves the reference store backed by `service`.
    pub async fn store(service: Service) -> Self {
        Self::new(ledgerbench_store::api::router(service)).await
    }

    pub async fn new(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the base URL of the server.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    pub fn backend(&self) -> SharedBackend {
        Arc::new(HttpBackend::new(&self.url(), Duration::from_secs(10)).unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
