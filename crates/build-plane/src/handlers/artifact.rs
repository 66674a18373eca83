use axum::{extract::{Query, State}, http::{header, HeaderValue}, response::{IntoResponse, Response}};
use serde::Deserialize;
use utoipa::IntoParams;
use crate::{error::{ApiError, ApiResult}, telemetry::ARTIFACT_BYTES_SERVED, AppState};
use super::attachment;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ArtifactQuery { pub artifact_id: Option<String> }

/// Stream the package out of a finished CI build's artifact bundle.
#[utoipa::path(get, path = "/api/artifact", params(ArtifactQuery), responses(
    (status = 200, description = "Signed package (application/vnd.android.package-archive)"),
    (status = 400, body = crate::error::ApiErrorBody),
    (status = 404, body = crate::error::ApiErrorBody),
    (status = 502, body = crate::error::ApiErrorBody),
))]
#[tracing::instrument(level = "info", skip(state, q), fields(artifact_id=?q.artifact_id))]
pub async fn fetch_artifact(State(state): State<AppState>, Query(q): Query<ArtifactQuery>) -> ApiResult<Response> {
    let id = q.artifact_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("artifactId is required"))?;
    let artifact = state.retriever.retrieve(id).await?;
    ARTIFACT_BYTES_SERVED.inc_by(artifact.bytes.len() as u64);
    let len = artifact.bytes.len();
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.mime_type)),
            (header::CONTENT_DISPOSITION, attachment(&artifact.filename)),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        artifact.bytes,
    ).into_response())
}
