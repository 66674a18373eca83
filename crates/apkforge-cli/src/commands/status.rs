use std::time::Duration;
use anyhow::Result;
use serde_json::json;
use crate::client::{ApiClient, JobStatus};

pub fn render(s: &JobStatus) -> String {
    let mut v = json!({ "status": s.status });
    if let Some(a) = &s.artifact_id { v["artifactId"] = json!(a); }
    if let Some(r) = &s.reason { v["reason"] = json!(r); }
    v.to_string()
}

pub async fn handle(client: &ApiClient, build_id: &str, stale_after: Option<u64>) -> Result<()> {
    let s = client.status(build_id, stale_after.map(Duration::from_secs)).await?;
    println!("{}", render(&s));
    Ok(())
}
