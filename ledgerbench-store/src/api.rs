//! HTTP API exposing a [`Service`] through the function-call protocol.
//!
//! Successful calls answer `200 OK` with the success envelope. Optimistic concurrency conflicts
//! answer `503 Service Unavailable` with an [`UnavailableBody`], and all other failures answer
//! `400 Bad Request` with the error envelope.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::functions::{FunctionKind, Service};
use crate::protocol::{FunctionCall, FunctionResult, OCC_FAILURE, UnavailableBody};

/// Creates the router serving `/api/mutation`, `/api/query` and `/health`.
pub fn router(service: Service) -> Router {
    Router::new()
        .route("/api/mutation", post(mutation))
        .route("/api/query", post(query))
        .route("/health", get(health))
        .with_state(service)
}

async fn mutation(State(service): State<Service>, Json(call): Json<FunctionCall>) -> Response {
    respond(service.call(FunctionKind::Mutation, &call.path, call.args))
}

async fn query(State(service): State<Service>, Json(call): Json<FunctionCall>) -> Response {
    respond(service.call(FunctionKind::Query, &call.path, call.args))
}

async fn health() -> &'static str {
    "OK"
}

fn respond(result: FunctionResult) -> Response {
    match result {
        FunctionResult::Error {
            error_message,
            error_data: Some(data),
        } if data.code == OCC_FAILURE => {
            let body = UnavailableBody {
                code: data.code,
                message: error_message,
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
        FunctionResult::Success { .. } => (StatusCode::OK, Json(result)).into_response(),
        FunctionResult::Error { .. } => (StatusCode::BAD_REQUEST, Json(result)).into_response(),
    }
}
