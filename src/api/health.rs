use super::AppState;
use crate::telemetry::MetricsSnapshot;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub metrics: MetricsSnapshot,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        metrics: state.orchestrator.metrics().snapshot(),
    })
}
