use axum::{response::{IntoResponse, Response}, Json, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody { pub code: &'static str, pub message: String }

#[derive(Debug, Clone)]
pub struct ApiError { pub status: StatusCode, pub code: &'static str, pub message: String }

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::new(StatusCode::NOT_FOUND, "not_found", msg) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg) }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, "bad_request", msg) }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}: {}", self.code, self.message) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Packaging pipeline stage a local build failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainStage { Workspace, Generate, Compile, Sign, Fingerprint }

impl ToolchainStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Generate => "generate",
            Self::Compile => "compile",
            Self::Sign => "sign",
            Self::Fingerprint => "fingerprint",
        }
    }
}

impl Display for ToolchainStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Failure taxonomy of the orchestration core. Every variant keeps enough detail
/// for the HTTP boundary to tell the kinds apart.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream request failed ({status}): {message}")]
    UpstreamRequest { status: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bundle contains {count} package entries, expected exactly one")]
    AmbiguousBundle { count: usize },
    #[error("toolchain failed at {stage} stage: {source:#}")]
    Toolchain { stage: ToolchainStage, #[source] source: anyhow::Error },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn toolchain(stage: ToolchainStage, source: impl Into<anyhow::Error>) -> Self {
        Self::Toolchain { stage, source: source.into() }
    }
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamRequest { status, message: message.into() }
    }

    /// Stable label used for metrics and the JSON `code` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UpstreamRequest { .. } => "upstream_request",
            Self::NotFound(_) => "not_found",
            Self::AmbiguousBundle { .. } => "ambiguous_bundle",
            Self::Toolchain { .. } => "toolchain",
            Self::Io(_) => "io",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Toolchain { .. } | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // An upstream status outside the valid range degrades to 502.
            Self::UpstreamRequest { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AmbiguousBundle { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(e: BuildError) -> Self { ApiError::new(e.status(), e.kind(), e.to_string()) }
}

pub type CoreResult<T> = Result<T, BuildError>;
