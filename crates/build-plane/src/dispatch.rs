//! Remote build submission through `workflow_dispatch`.
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tracing::info;
use crate::{ci::GitHubClient, error::{BuildError, CoreResult}, models::{BuildRequest, JobId}};

/// GitHub rejects `workflow_dispatch` inputs whose JSON payload exceeds 65,535
/// characters, counted over all inputs together.
pub const MAX_DISPATCH_INPUT_CHARS: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt { pub job_id: JobId, pub tracking_url: String }

#[async_trait]
pub trait BuildDispatcher: Send + Sync {
    /// Hands the request to remote CI and returns as soon as it is accepted. The job
    /// id is the one minted with the request.
    async fn dispatch(&self, request: &BuildRequest) -> CoreResult<DispatchReceipt>;
}

#[derive(Debug, Clone)]
pub struct WorkflowDispatcher { client: GitHubClient }

impl WorkflowDispatcher {
    pub fn new(client: GitHubClient) -> Self { Self { client } }
}

/// `workflow_dispatch` inputs for one request.
pub fn dispatch_inputs(request: &BuildRequest) -> CoreResult<serde_json::Value> {
    let inputs = json!({
        "build_id": request.job_id().to_string(),
        "app_name": request.app_name(),
        "app_url": request.target_url().as_str(),
        "icon_base64": base64::engine::general_purpose::STANDARD.encode(request.icon_png()),
    });
    let size = inputs.to_string().chars().count();
    if size > MAX_DISPATCH_INPUT_CHARS {
        return Err(BuildError::InvalidRequest(format!(
            "icon and url too large for remote build ({size} chars of workflow inputs, limit {MAX_DISPATCH_INPUT_CHARS})"
        )));
    }
    Ok(inputs)
}

#[async_trait]
impl BuildDispatcher for WorkflowDispatcher {
    #[tracing::instrument(skip(self, request), fields(job_id=%request.job_id()))]
    async fn dispatch(&self, request: &BuildRequest) -> CoreResult<DispatchReceipt> {
        let remote = self.client.remote()?;
        let inputs = dispatch_inputs(request)?;
        self.client.dispatch_workflow(inputs).await?;
        let tracking_url = remote.actions_page();
        info!(job_id=%request.job_id(), workflow=%remote.workflow, "build.dispatched");
        Ok(DispatchReceipt { job_id: request.job_id(), tracking_url })
    }
}
