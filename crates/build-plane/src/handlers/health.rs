use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;
use crate::{coordinator::mode_label, AppState};

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Execution path new submissions take.
    pub build_mode: &'static str,
    pub remote_configured: bool,
}

/// Health check endpoint
#[utoipa::path(get, path = "/health", responses( (status = 200, body = HealthResponse) ))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        build_mode: mode_label(state.coordinator.mode()),
        remote_configured: state.settings.remote().is_ok(),
    })
}
