//! The harness talking to the reference store over HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::routing::post;
use ledgerbench::executor::Failure;
use ledgerbench::scale::AccountBatch;
use ledgerbench::seeder::SeedingConfig;
use ledgerbench::{
    Error, HttpBackend, Metrics, Outcome, RetryPolicy, ScaleModel, Seeder, TransactionExecutor,
    TransactionParams, TransportError,
};
use ledgerbench_store::Service;
use ledgerbench_store::model::{Account, Branch, Teller};
use ledgerbench_store::protocol::{FunctionResult, TransactionValue, UnavailableBody};
use serde_json::json;

use common::TestServer;

mod common;

#[tokio::test]
async fn first_transaction_on_a_fresh_account() {
    let service = Service::default();
    let server = TestServer::store(service.clone()).await;
    let backend = server.backend();
    let scale = ScaleModel::new(1);

    let seeder = Seeder::new(Arc::clone(&backend), SeedingConfig::default());
    seeder.seed_branches(&scale).await.unwrap();
    seeder.seed_tellers(&scale).await.unwrap();
    let summary = seeder
        .seed_account_batch(
            AccountBatch {
                start_aid: 1,
                count: 5000,
            },
            &scale,
        )
        .await
        .unwrap();
    assert_eq!(summary.seeded, 5000);

    let store = service.store();
    assert!((1..=5000).all(|aid| store.get::<Account>(aid).unwrap().value.bid == 1));

    let executor = TransactionExecutor::new(
        backend,
        RetryPolicy::default(),
        Arc::new(Metrics::default()),
    );
    let outcome = executor
        .execute(TransactionParams {
            aid: 1,
            tid: 1,
            bid: 1,
            delta: 100,
        })
        .await;

    assert!(
        matches!(
            outcome,
            Outcome::Committed {
                balance: 100,
                attempts: 1
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(store.get::<Teller>(1).unwrap().value.balance, 100);
    assert_eq!(store.get::<Branch>(1).unwrap().value.balance, 100);
}

#[tokio::test]
async fn missing_accounts_are_not_retried() {
    let server = TestServer::store(Service::default()).await;
    let metrics = Arc::new(Metrics::default());
    let executor =
        TransactionExecutor::new(server.backend(), RetryPolicy::default(), metrics.clone());

    let outcome = executor
        .execute(TransactionParams {
            aid: 1,
            tid: 1,
            bid: 1,
            delta: 1,
        })
        .await;

    assert!(
        matches!(
            outcome,
            Outcome::Failed {
                failure: Failure::Permanent(Error::DependencyMissing { .. }),
                attempts: 1
            }
        ),
        "{outcome:?}"
    );
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.retries, 0);
}

#[tokio::test]
async fn unavailable_conflicts_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = axum::Router::new().route(
        "/api/mutation",
        post({
            let calls = Arc::clone(&calls);
            move || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        let body = UnavailableBody {
                            code: "OptimisticConcurrencyControlFailure".into(),
                            message: "try again".into(),
                        };
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!(body)))
                    } else {
                        let result = FunctionResult::success(TransactionValue { abalance: 7 });
                        (StatusCode::OK, Json(json!(result)))
                    }
                }
            }
        }),
    );
    let server = TestServer::new(router).await;

    let metrics = Arc::new(Metrics::default());
    let executor =
        TransactionExecutor::new(server.backend(), RetryPolicy::default(), metrics.clone());
    let outcome = executor
        .execute(TransactionParams {
            aid: 1,
            tid: 1,
            bid: 1,
            delta: 7,
        })
        .await;

    assert!(
        matches!(
            outcome,
            Outcome::Committed {
                balance: 7,
                attempts: 3
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.retries, 2);
    assert_eq!(snapshot.failed, 0);
}

#[tokio::test]
async fn server_errors_fail_without_retry() {
    let router = axum::Router::new().route(
        "/api/mutation",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let server = TestServer::new(router).await;

    let executor = TransactionExecutor::new(
        server.backend(),
        RetryPolicy::default(),
        Arc::new(Metrics::default()),
    );
    let outcome = executor
        .execute(TransactionParams {
            aid: 1,
            tid: 1,
            bid: 1,
            delta: 1,
        })
        .await;

    assert!(
        matches!(
            outcome,
            Outcome::Failed {
                failure: Failure::Permanent(Error::Backend { code: None, .. }),
                attempts: 1
            }
        ),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn conflict_codes_outside_unavailable_are_permanent() {
    let conflict = json!({"code": "OptimisticConcurrencyControlFailure", "message": "x"});
    let envelope = json!(FunctionResult::error(
        "x",
        Some("OptimisticConcurrencyControlFailure")
    ));

    for (status, body) in [
        (StatusCode::INTERNAL_SERVER_ERROR, conflict),
        (StatusCode::BAD_REQUEST, envelope),
    ] {
        let router = axum::Router::new().route(
            "/api/mutation",
            post(move || async move { (status, Json(body)) }),
        );
        let server = TestServer::new(router).await;

        let metrics = Arc::new(Metrics::default());
        let executor =
            TransactionExecutor::new(server.backend(), RetryPolicy::default(), metrics.clone());
        let outcome = executor
            .execute(TransactionParams {
                aid: 1,
                tid: 1,
                bid: 1,
                delta: 1,
            })
            .await;

        assert!(
            matches!(
                outcome,
                Outcome::Failed {
                    failure: Failure::Permanent(Error::Backend { code: None, .. }),
                    attempts: 1
                }
            ),
            "{status}: {outcome:?}"
        );
        assert_eq!(metrics.snapshot().retries, 0);
    }
}

#[tokio::test]
async fn unreachable_deployments_are_transport_errors() {
    // Bind and immediately release a port so that nothing listens on it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let backend = HttpBackend::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(5))
        .unwrap();
    let executor = TransactionExecutor::new(
        Arc::new(backend),
        RetryPolicy::default(),
        Arc::new(Metrics::default()),
    );
    let outcome = executor
        .execute(TransactionParams {
            aid: 1,
            tid: 1,
            bid: 1,
            delta: 1,
        })
        .await;

    assert!(
        matches!(
            outcome,
            Outcome::Failed {
                failure: Failure::Permanent(Error::Transport(TransportError::Reqwest { .. })),
                attempts: 1
            }
        ),
        "{outcome:?}"
    );
}
