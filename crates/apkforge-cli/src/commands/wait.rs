use std::{path::Path, time::{Duration, Instant}};
use anyhow::Result;
use tracing::{debug, info};
use crate::{client::{ApiClient, JobStatus}, errors::{CliError, CliErrorKind}};
use super::{fetch, status::render};

#[derive(Debug, Clone)]
pub struct WaitPolicy { pub interval: Duration, pub timeout: Duration, pub stale_after: Option<Duration> }

/// Polls until the build reaches a terminal state. A failed build and an expired
/// deadline are both errors; the caller owns both the cadence and the deadline.
pub async fn until_terminal(client: &ApiClient, build_id: &str, policy: &WaitPolicy) -> Result<JobStatus> {
    let deadline = Instant::now() + policy.timeout;
    let mut polls = 0u32;
    loop {
        let s = client.status(build_id, policy.stale_after).await?;
        polls += 1;
        debug!(build_id, polls, status=%s.status, "wait.poll");
        if s.status == "failed" {
            let reason = s.reason.clone().unwrap_or_else(|| "unknown".into());
            return Err(CliError::new(CliErrorKind::BuildFailed(reason)).into());
        }
        if s.is_terminal() { return Ok(s); }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(CliErrorKind::Timeout(format!("build {build_id} still {} after {polls} polls", s.status))).into());
        }
        tokio::time::sleep(policy.interval.min(remaining)).await;
    }
}

pub async fn handle(client: &ApiClient, build_id: &str, policy: WaitPolicy, download: bool, out: Option<&Path>) -> Result<()> {
    let done = until_terminal(client, build_id, &policy).await?;
    info!(build_id, artifact_id=?done.artifact_id, "wait.completed");
    println!("{}", render(&done));
    if download {
        let Some(artifact_id) = done.artifact_id.as_deref() else {
            return Err(CliError::new(CliErrorKind::Runtime("completed build reported no artifact id".into())).into());
        };
        let path = fetch::save(client.artifact(artifact_id).await?, out).await?;
        println!("{}", path.display());
    }
    Ok(())
}
