//! Minimal GitHub Actions REST client.
//!
//! Coordinates are resolved from [`Settings`] on every call, so a missing token or
//! repository surfaces as a configuration error on first use instead of at startup.
use std::{sync::Arc, time::Duration};
use reqwest::{header, Response};
use serde::Deserialize;
use tracing::debug;
use crate::{config::{RemoteCi, Settings}, error::{BuildError, CoreResult}};

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("apkforge-build-plane/", env!("CARGO_PKG_VERSION"));
/// Longest upstream error body echoed back to callers.
const ERROR_SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)] pub name: Option<String>,
    #[serde(default)] pub display_title: Option<String>,
    #[serde(default)] pub status: Option<String>,
    #[serde(default)] pub conclusion: Option<String>,
    #[serde(default)] pub html_url: Option<String>,
}

impl WorkflowRun {
    /// True when the run was tagged with `tag` through the workflow's `run-name`.
    pub fn is_tagged(&self, tag: &str) -> bool {
        [&self.display_title, &self.name].into_iter().flatten().any(|t| t.contains(tag))
    }
}

#[derive(Debug, Deserialize)]
struct RunList { #[serde(default)] workflow_runs: Vec<WorkflowRun> }

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)] pub size_in_bytes: u64,
    #[serde(default)] pub expired: bool,
}

#[derive(Debug, Deserialize)]
struct ArtifactList { #[serde(default)] artifacts: Vec<ArtifactInfo> }

#[derive(Clone)]
pub struct GitHubClient { http: reqwest::Client, settings: Arc<Settings> }

impl std::fmt::Debug for GitHubClient { fn fmt(&self, f:&mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("GitHubClient").finish() } }

impl GitHubClient {
    pub fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn remote(&self) -> CoreResult<RemoteCi> { self.settings.remote() }

    fn request(&self, remote: &RemoteCi, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http.request(method, url)
            .bearer_auth(&remote.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Fire-and-forget `workflow_dispatch`. GitHub answers 204 with no body.
    pub async fn dispatch_workflow(&self, inputs: serde_json::Value) -> CoreResult<()> {
        let remote = self.remote()?;
        let url = format!("{}/actions/workflows/{}/dispatches", remote.repo_api(), remote.workflow);
        let body = serde_json::json!({ "ref": remote.git_ref, "inputs": inputs });
        let res = self.request(&remote, reqwest::Method::POST, url).json(&body).send().await.map_err(transport)?;
        ensure_success(res).await?;
        Ok(())
    }

    /// Most recent dispatch-triggered runs of the build workflow, newest first.
    pub async fn recent_runs(&self) -> CoreResult<Vec<WorkflowRun>> {
        let remote = self.remote()?;
        let url = format!("{}/actions/workflows/{}/runs", remote.repo_api(), remote.workflow);
        let res = self.request(&remote, reqwest::Method::GET, url)
            .query(&[("event", "workflow_dispatch".to_string()), ("per_page", remote.scan_limit.to_string())])
            .send().await.map_err(transport)?;
        let list: RunList = ensure_success(res).await?.json().await.map_err(decode)?;
        debug!(runs=list.workflow_runs.len(), "ci.runs.listed");
        Ok(list.workflow_runs)
    }

    pub async fn run_artifacts(&self, run_id: u64) -> CoreResult<Vec<ArtifactInfo>> {
        let remote = self.remote()?;
        let url = format!("{}/actions/runs/{run_id}/artifacts", remote.repo_api());
        let res = self.request(&remote, reqwest::Method::GET, url).send().await.map_err(transport)?;
        let list: ArtifactList = ensure_success(res).await?.json().await.map_err(decode)?;
        Ok(list.artifacts)
    }

    /// Downloads an artifact's zip bundle fully into memory. GitHub redirects to blob
    /// storage; reqwest follows it and drops the bearer token on the cross-host hop.
    pub async fn download_artifact(&self, artifact_id: u64) -> CoreResult<Vec<u8>> {
        let remote = self.remote()?;
        let url = format!("{}/actions/artifacts/{artifact_id}/zip", remote.repo_api());
        let res = self.request(&remote, reqwest::Method::GET, url).send().await.map_err(transport)?;
        let bytes = ensure_success(res).await?.bytes().await.map_err(transport)?;
        debug!(artifact_id, size_bytes=bytes.len(), "ci.artifact.downloaded");
        Ok(bytes.to_vec())
    }
}

fn transport(e: reqwest::Error) -> BuildError {
    let status = e.status().map(|s| s.as_u16()).unwrap_or(502);
    BuildError::upstream(status, format!("ci request failed: {e}"))
}

fn decode(e: reqwest::Error) -> BuildError { BuildError::upstream(502, format!("ci response not understood: {e}")) }

async fn ensure_success(res: Response) -> CoreResult<Response> {
    let status = res.status();
    if status.is_success() { return Ok(res); }
    let body = res.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(ERROR_SNIPPET_CHARS).collect();
    Err(BuildError::upstream(status.as_u16(), if snippet.is_empty() { status.to_string() } else { snippet }))
}
