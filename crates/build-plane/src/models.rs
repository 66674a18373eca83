use std::{fmt, path::PathBuf, str::FromStr, time::Duration};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;
use crate::error::{BuildError, CoreResult};

pub const MAX_APP_NAME_CHARS: usize = 20;
pub const PACKAGE_EXTENSION: &str = ".apk";
pub const PACKAGE_MIME: &str = "application/vnd.android.package-archive";
const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const PACKAGE_NAMESPACE: &str = "com.apkforge";

/// Locally minted correlation id. UUIDv7, so the mint instant travels with the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn mint() -> Self { Self(Uuid::now_v7()) }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        Utc.timestamp_opt(i64::try_from(secs).ok()?, nanos).single()
    }

    /// Elapsed time since mint, `None` for ids without an embedded timestamp.
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (now - self.created_at()?).to_std().ok()
    }

    /// Android application id for this job. Hash-derived so it is a pure function
    /// of the id and always a legal package segment.
    pub fn package_identifier(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.0.as_hyphenated().to_string().as_bytes()));
        format!("{PACKAGE_NAMESPACE}.w{}", &digest[..24])
    }

    /// Name the remote workflow gives its uploaded bundle.
    pub fn artifact_name(&self) -> String { format!("apk-{}", self) }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0.as_hyphenated()) }
}

impl FromStr for JobId {
    type Err = BuildError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|_| BuildError::InvalidRequest(format!("malformed build id '{s}'")))
    }
}

/// Validated build submission. Constructed only through [`BuildRequest::new`].
#[derive(Clone)]
pub struct BuildRequest {
    app_name: String,
    target_url: url::Url,
    icon_png: Vec<u8>,
    correlation_seed: JobId,
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest").field("app_name", &self.app_name).field("target_url", &self.target_url.as_str())
            .field("icon_bytes", &self.icon_png.len()).field("job_id", &self.correlation_seed).finish()
    }
}

impl BuildRequest {
    pub fn new(app_name: &str, target_url: &str, icon_png: Vec<u8>) -> CoreResult<Self> {
        let app_name = app_name.trim();
        if app_name.is_empty() { return Err(BuildError::InvalidRequest("application name required".into())); }
        if app_name.chars().count() > MAX_APP_NAME_CHARS {
            return Err(BuildError::InvalidRequest(format!("application name exceeds {MAX_APP_NAME_CHARS} characters")));
        }
        if app_name.chars().any(char::is_control) { return Err(BuildError::InvalidRequest("application name contains control characters".into())); }
        let target_url = url::Url::parse(target_url.trim()).map_err(|e| BuildError::InvalidRequest(format!("invalid url: {e}")))?;
        if !matches!(target_url.scheme(), "http" | "https") || target_url.host_str().is_none() {
            return Err(BuildError::InvalidRequest("url must be an absolute http(s) url".into()));
        }
        if !icon_png.starts_with(PNG_SIGNATURE) { return Err(BuildError::InvalidRequest("icon must be a PNG image".into())); }
        Ok(Self { app_name: app_name.to_string(), target_url, icon_png, correlation_seed: JobId::mint() })
    }

    pub fn app_name(&self) -> &str { &self.app_name }
    pub fn target_url(&self) -> &url::Url { &self.target_url }
    pub fn icon_png(&self) -> &[u8] { &self.icon_png }
    pub fn job_id(&self) -> JobId { self.correlation_seed }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode { Local, Remote }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState { Pending, Running, Completed, Failed }

impl JobState {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Failed) }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!((self, next), (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed))
    }
}

#[derive(Debug, Clone)]
pub struct BuildJob { pub id: JobId, pub mode: BuildMode, pub state: JobState, pub created_at: DateTime<Utc> }

impl BuildJob {
    pub fn new(id: JobId, mode: BuildMode) -> Self {
        Self { id, mode, state: JobState::Pending, created_at: id.created_at().unwrap_or_else(Utc::now) }
    }

    /// Applies a transition, refusing anything the state table does not allow.
    pub fn advance(&mut self, next: JobState) -> bool {
        if self.state == next || !self.state.can_transition_to(next) { return false; }
        self.state = next;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocator { Local(PathBuf), Remote(String) }

#[derive(Debug, Clone)]
pub struct BuildResult { pub package_identifier: String, pub certificate_fingerprint: String, pub artifact: ArtifactLocator }

/// Result of a submission: finished inline, or handed to remote CI for polling.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Completed { job_id: JobId, result: BuildResult },
    Dispatched { job_id: JobId, tracking_url: String },
}

/// What one poll learned about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus { pub state: JobState, pub artifact_id: Option<String>, pub reason: Option<String> }

impl JobStatus {
    pub fn pending() -> Self { Self { state: JobState::Pending, artifact_id: None, reason: None } }
    pub fn running() -> Self { Self { state: JobState::Running, artifact_id: None, reason: None } }
    pub fn completed(artifact_id: impl Into<String>) -> Self { Self { state: JobState::Completed, artifact_id: Some(artifact_id.into()), reason: None } }
    pub fn failed(reason: impl Into<String>) -> Self { Self { state: JobState::Failed, artifact_id: None, reason: Some(reason.into()) } }
}

/// Package file pulled out of a bundle, ready to be sent as-is.
#[derive(Debug, Clone)]
pub struct RetrievedArtifact { pub filename: String, pub mime_type: &'static str, pub bytes: Vec<u8> }
