use std::time::Duration;
use axum::{extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use crate::{error::{ApiError, ApiResult}, models::{JobId, JobState}, AppState};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    pub build_id: Option<String>,
    /// Report an id no run has picked up as failed once it is older than this.
    pub stale_after_secs: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Poll a dispatched build. Safe to repeat; nothing changes server-side.
#[utoipa::path(get, path = "/api/status", params(StatusQuery), responses(
    (status = 200, body = StatusResponse),
    (status = 400, body = crate::error::ApiErrorBody),
    (status = 500, body = crate::error::ApiErrorBody),
))]
#[tracing::instrument(level = "debug", skip(state, q), fields(build_id=?q.build_id))]
pub async fn build_status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> ApiResult<Json<StatusResponse>> {
    let raw = q.build_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("buildId is required"))?;
    let job_id: JobId = raw.parse()?;
    let status = state.resolver.poll(job_id, q.stale_after_secs.map(Duration::from_secs)).await?;
    Ok(Json(StatusResponse { status: status.state, artifact_id: status.artifact_id, reason: status.reason }))
}
