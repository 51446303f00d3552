//! HTTP surface of the manager.

pub mod deployments;
pub mod error;
pub mod health;

use crate::orchestrator::Orchestrator;
use axum::{
    body::Body,
    http::{HeaderName, Request},
    routing::{get, post},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

const REQUEST_ID: &str = "request-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Add error details to 500 responses (non-production only)
    pub expose_errors: bool,
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID);

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/deployments",
            post(deployments::deploy).delete(deployments::teardown),
        )
        .route(
            "/deployments/{requester_id}/{challenge_id}",
            get(deployments::status),
        )
        .with_state(state)
        // layers wrap outward: the id is set before the trace span is created
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get(REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id
            )
        }))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}
