use axum::{extract::{Query, State}, http::{header, HeaderValue}, response::{IntoResponse, Response}};
use serde::Deserialize;
use utoipa::IntoParams;
use crate::{error::{ApiError, ApiResult}, models::{JobId, PACKAGE_MIME}, telemetry::ARTIFACT_BYTES_SERVED, AppState};
use super::attachment;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DownloadQuery { pub build_id: Option<String> }

/// Serve the signed package of a build this host ran locally.
#[utoipa::path(get, path = "/api/download", params(DownloadQuery), responses(
    (status = 200, description = "Signed package (application/vnd.android.package-archive)"),
    (status = 400, body = crate::error::ApiErrorBody),
    (status = 404, body = crate::error::ApiErrorBody),
))]
#[tracing::instrument(level = "info", skip(state, q), fields(build_id=?q.build_id))]
pub async fn download_local(State(state): State<AppState>, Query(q): Query<DownloadQuery>) -> ApiResult<Response> {
    let raw = q.build_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("buildId is required"))?;
    let job_id: JobId = raw.parse()?;
    let path = state.coordinator.local_artifact(job_id)
        .ok_or_else(|| ApiError::not_found(format!("no local package for build {job_id}")))?;
    let bytes = tokio::fs::read(&path).await
        .map_err(|e| ApiError::internal(format!("package unreadable: {e}")))?;
    ARTIFACT_BYTES_SERVED.inc_by(bytes.len() as u64);
    let filename = format!("{}.apk", job_id.package_identifier());
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PACKAGE_MIME)),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
            (header::CONTENT_LENGTH, HeaderValue::from(bytes.len())),
        ],
        bytes,
    ).into_response())
}
