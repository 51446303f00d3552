//! Deployment lifecycle endpoints.

use super::{
    error::{ApiError, ApiResult},
    AppState,
};
use crate::{
    date_time::DateTime,
    model::{DeploymentRecord, DeploymentRequest, DeploymentState, FailureCause},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBody {
    pub requester_id: String,
    pub challenge_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeployResponse {
    pub url: Option<String>,
    pub state: DeploymentState,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub requester_id: String,
    pub challenge_id: String,
    pub state: DeploymentState,
    pub url: Option<String>,
    pub cause: Option<FailureCause>,
    pub created_at: Option<DateTime>,
    pub expires_at: Option<DateTime>,
}

impl From<DeploymentRecord> for StatusResponse {
    fn from(record: DeploymentRecord) -> Self {
        Self {
            requester_id: record.requester_id,
            challenge_id: record.challenge_id,
            state: record.state,
            url: record.url,
            cause: record.cause,
            created_at: Some(record.created_at),
            expires_at: record.expires_at,
        }
    }
}

/// POST /deployments
pub async fn deploy(
    State(state): State<AppState>,
    payload: Result<Json<DeploymentBody>, JsonRejection>,
) -> ApiResult<Json<DeployResponse>> {
    let Json(body) = payload?;
    tracing::info!("Deploying {} for {}", body.challenge_id, body.requester_id);

    let record = state
        .orchestrator
        .deploy(DeploymentRequest::new(body.requester_id, body.challenge_id))
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(DeployResponse {
        url: record.url,
        state: record.state,
    }))
}

/// DELETE /deployments
pub async fn teardown(
    State(state): State<AppState>,
    payload: Result<Json<DeploymentBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = payload?;
    tracing::info!("Tearing down {} for {}", body.challenge_id, body.requester_id);

    state
        .orchestrator
        .teardown(&body.requester_id, &body.challenge_id)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /deployments/{requester_id}/{challenge_id}
pub async fn status(
    State(state): State<AppState>,
    Path((requester_id, challenge_id)): Path<(String, String)>,
) -> ApiResult<Json<StatusResponse>> {
    let record = state
        .orchestrator
        .status(&requester_id, &challenge_id)
        .map_err(|e| state.fail(e))?;

    let response = match record {
        Some(record) => record.into(),
        None => StatusResponse {
            requester_id,
            challenge_id,
            state: DeploymentState::Absent,
            url: None,
            cause: None,
            created_at: None,
            expires_at: None,
        },
    };
    Ok(Json(response))
}

impl AppState {
    fn fail(&self, error: crate::error::Error) -> ApiError {
        ApiError::from_error(error, self.expose_errors)
    }
}
