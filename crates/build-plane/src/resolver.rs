//! Maps remote CI run state onto [`JobState`] for a correlation id.
//!
//! Nothing is persisted: every poll re-reads the recent run listing, so polling the
//! same id repeatedly without an upstream change yields the same answer.
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use crate::{
    ci::{ArtifactInfo, GitHubClient, WorkflowRun},
    error::CoreResult,
    models::{JobId, JobState, JobStatus},
};

pub const STALE_REASON: &str = "stale";
pub const EXPIRED_REASON: &str = "artifact expired";

#[async_trait]
pub trait JobStatusResolver: Send + Sync {
    /// `stale_after` is the caller's patience: an id that has no matching run and is
    /// older than this is reported Failed instead of Pending.
    async fn poll(&self, job_id: JobId, stale_after: Option<Duration>) -> CoreResult<JobStatus>;
}

/// Outcome of classifying the matched run, before any artifact lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    Settled(JobStatus),
    /// Run succeeded; the artifact listing decides between Completed and Running.
    Succeeded { run_id: u64 },
}

pub fn classify(run: &WorkflowRun) -> RunVerdict {
    match run.status.as_deref().unwrap_or("queued") {
        "completed" => match run.conclusion.as_deref() {
            Some("success") => RunVerdict::Succeeded { run_id: run.id },
            Some(other) => RunVerdict::Settled(JobStatus::failed(other)),
            None => RunVerdict::Settled(JobStatus::failed("unknown")),
        },
        "in_progress" => RunVerdict::Settled(JobStatus::running()),
        // queued, requested, waiting, pending and anything newer GitHub adds before start.
        _ => RunVerdict::Settled(JobStatus::pending()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactPick<'a> {
    Found(&'a ArtifactInfo),
    /// The job's own bundle is listed but past retention.
    Expired,
    /// Nothing usable yet.
    Missing,
}

/// Bundle for `job_id` among a run's artifacts. Only when no artifact carries the
/// job's name does the only live artifact stand in for it.
pub fn pick_artifact(artifacts: &[ArtifactInfo], job_id: JobId) -> ArtifactPick<'_> {
    let name = job_id.artifact_name();
    let named: Vec<&ArtifactInfo> = artifacts.iter().filter(|a| a.name == name).collect();
    if !named.is_empty() {
        return match named.iter().copied().find(|a| !a.expired) {
            Some(a) => ArtifactPick::Found(a),
            None => ArtifactPick::Expired,
        };
    }
    match artifacts.iter().filter(|a| !a.expired).collect::<Vec<_>>().as_slice() {
        [only] => ArtifactPick::Found(*only),
        _ => ArtifactPick::Missing,
    }
}

/// Status for an id no recent run is tagged with.
pub fn unmatched(job_id: JobId, stale_after: Option<Duration>, now: DateTime<Utc>) -> JobStatus {
    match (stale_after, job_id.age_at(now)) {
        (Some(limit), Some(age)) if age > limit => JobStatus::failed(STALE_REASON),
        _ => JobStatus::pending(),
    }
}

#[derive(Debug, Clone)]
pub struct RunScanResolver { client: GitHubClient }

impl RunScanResolver {
    pub fn new(client: GitHubClient) -> Self { Self { client } }
}

#[async_trait]
impl JobStatusResolver for RunScanResolver {
    #[tracing::instrument(skip(self, job_id), fields(job_id=%job_id))]
    async fn poll(&self, job_id: JobId, stale_after: Option<Duration>) -> CoreResult<JobStatus> {
        let tag = job_id.to_string();
        let runs = self.client.recent_runs().await?;
        let Some(run) = runs.iter().find(|r| r.is_tagged(&tag)) else {
            let status = unmatched(job_id, stale_after, Utc::now());
            debug!(scanned=runs.len(), state=?status.state, "resolver.unmatched");
            return Ok(status);
        };
        let status = match classify(run) {
            RunVerdict::Settled(status) => status,
            RunVerdict::Succeeded { run_id } => {
                let artifacts = self.client.run_artifacts(run_id).await?;
                match pick_artifact(&artifacts, job_id) {
                    ArtifactPick::Found(a) => JobStatus::completed(a.id.to_string()),
                    ArtifactPick::Expired => JobStatus::failed(EXPIRED_REASON),
                    // Upload not visible yet.
                    ArtifactPick::Missing => JobStatus::running(),
                }
            }
        };
        debug!(run_id=run.id, state=?status.state, "resolver.matched");
        debug_assert!(status.state != JobState::Completed || status.artifact_id.is_some());
        Ok(status)
    }
}
