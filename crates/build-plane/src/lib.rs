pub mod ci;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod icon_server;
pub mod local;
pub mod models;
pub mod package_builder;
pub mod resolver;
pub mod retriever;
pub mod telemetry;
pub mod test_support;
pub mod workspace;

use std::sync::Arc;
use axum::{extract::DefaultBodyLimit, middleware, routing::{get, post}, Router};
use utoipa::OpenApi;
use crate::{
    ci::GitHubClient,
    config::Settings,
    coordinator::BuildCoordinator,
    dispatch::WorkflowDispatcher,
    handlers::{artifact::fetch_artifact, build::submit_build, download::download_local, health::health, status::build_status},
    package_builder::{PackageBuilder, ToolchainBuilder},
    resolver::{JobStatusResolver, RunScanResolver},
    retriever::ArtifactRetriever,
    telemetry::{metrics_handler, track_metrics},
};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<BuildCoordinator>,
    pub resolver: Arc<dyn JobStatusResolver>,
    pub retriever: Arc<ArtifactRetriever>,
}

impl AppState {
    /// Production wiring: the real toolchain behind the local path.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let builder = Arc::new(ToolchainBuilder::new(settings.toolchain.clone()));
        Self::with_builder(Arc::new(settings), builder)
    }

    pub fn with_builder(settings: Arc<Settings>, builder: Arc<dyn PackageBuilder>) -> anyhow::Result<Self> {
        let client = GitHubClient::new(settings.clone())?;
        let dispatcher = Arc::new(WorkflowDispatcher::new(client.clone()));
        Ok(Self {
            coordinator: Arc::new(BuildCoordinator::new(settings.clone(), builder, dispatcher)),
            resolver: Arc::new(RunScanResolver::new(client.clone())),
            retriever: Arc::new(ArtifactRetriever::new(client)),
            settings,
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::build::submit_build,
        handlers::status::build_status,
        handlers::artifact::fetch_artifact,
        handlers::download::download_local,
    ),
    components(schemas(
        error::ApiErrorBody,
        handlers::health::HealthResponse,
        handlers::build::LocalBuildResponse,
        handlers::build::CloudBuildResponse,
        handlers::build::BuildFailure,
        handlers::build::BuildUpload,
        handlers::status::StatusResponse,
        models::JobState,
    )),
    tags( (name = "apkforge", description = "APKForge build orchestration API") )
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();
    // Multipart overhead on top of the icon itself.
    let body_limit = state.settings.max_upload_bytes + 64 * 1024;
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/build", post(submit_build))
        .route("/api/status", get(build_status))
        .route("/api/artifact", get(fetch_artifact))
        .route("/api/download", get(download_local))
        .route("/openapi.json", get(|| async move { axum::Json(openapi.clone()) }))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}
