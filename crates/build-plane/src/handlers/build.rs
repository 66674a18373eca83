use axum::{extract::{Multipart, State}, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use utoipa::ToSchema;
use tracing::warn;
use crate::{error::BuildError, models::{ArtifactLocator, BuildRequest, SubmitOutcome}, AppState};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalBuildResponse {
    pub success: bool,
    /// Always `local`.
    pub mode: &'static str,
    pub build_id: String,
    pub download_url: String,
    pub package_id: String,
    pub sha256_fingerprint: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudBuildResponse {
    pub success: bool,
    /// Always `cloud`.
    pub mode: &'static str,
    pub build_id: String,
    pub tracking_url: String,
}

/// Multipart form accepted by the build route. `appName`/`appUrl` are accepted as
/// aliases of `name`/`url`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct BuildUpload {
    pub name: String,
    pub url: String,
    #[schema(value_type = String, format = Binary)]
    pub icon: Vec<u8>,
}

/// Failure envelope of the build route.
#[derive(Debug, Serialize, ToSchema)]
pub struct BuildFailure { pub success: bool, pub error: String }

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(BuildFailure { success: false, error: error.into() })).into_response()
}

fn rejected(e: BuildError) -> Response { failure(e.status(), e.to_string()) }

#[derive(Default)]
struct BuildForm { name: Option<String>, url: Option<String>, icon: Option<Vec<u8>> }

async fn read_form(mut multipart: Multipart) -> Result<BuildForm, BuildError> {
    let mut form = BuildForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return Err(BuildError::InvalidRequest(format!("malformed multipart body: {e}"))),
        };
        let name = field.name().map(|s| s.to_string());
        let read_err = |e: axum::extract::multipart::MultipartError| BuildError::InvalidRequest(format!("unreadable form field: {e}"));
        match name.as_deref() {
            Some("name" | "appName") => form.name = Some(field.text().await.map_err(read_err)?),
            Some("url" | "appUrl") => form.url = Some(field.text().await.map_err(read_err)?),
            Some("icon") => form.icon = Some(field.bytes().await.map_err(read_err)?.to_vec()),
            _ => {}
        }
    }
    Ok(form)
}

/// Submit a build. Local hosts answer with the finished package; otherwise the build
/// is dispatched to CI and the response carries the id to poll.
#[utoipa::path(post, path = "/api/build",
    request_body(content = BuildUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = LocalBuildResponse),
        (status = 202, body = CloudBuildResponse),
        (status = 400, body = BuildFailure),
        (status = 500, body = BuildFailure),
    ))]
#[tracing::instrument(level = "info", skip(state, multipart))]
pub async fn submit_build(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await { Ok(f) => f, Err(e) => return rejected(e) };
    let (Some(name), Some(url), Some(icon)) = (form.name, form.url, form.icon) else {
        return failure(StatusCode::BAD_REQUEST, "name, url and icon are required");
    };
    let request = match BuildRequest::new(&name, &url, icon) {
        Ok(r) => r,
        Err(e) => { warn!(error=%e, "build.rejected"); return rejected(e); }
    };
    match state.coordinator.submit(request).await {
        Ok(SubmitOutcome::Completed { job_id, result }) => {
            if !matches!(result.artifact, ArtifactLocator::Local(_)) {
                warn!(job_id=%job_id, "build.unexpected_locator");
            }
            (StatusCode::OK, Json(LocalBuildResponse {
                success: true,
                mode: "local",
                build_id: job_id.to_string(),
                download_url: format!("/api/download?buildId={job_id}"),
                package_id: result.package_identifier,
                sha256_fingerprint: result.certificate_fingerprint,
            })).into_response()
        }
        Ok(SubmitOutcome::Dispatched { job_id, tracking_url }) => (StatusCode::ACCEPTED, Json(CloudBuildResponse {
            success: true,
            mode: "cloud",
            build_id: job_id.to_string(),
            tracking_url,
        })).into_response(),
        Err(e) => rejected(e),
    }
}
