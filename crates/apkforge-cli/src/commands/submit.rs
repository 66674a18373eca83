use std::path::Path;
use anyhow::Result;
use tracing::info;
use crate::client::ApiClient;

pub async fn handle(client: &ApiClient, name: &str, url: &str, icon: &Path) -> Result<()> {
    let body = client.submit(name, url, icon).await?;
    info!(build_id=%body["buildId"].as_str().unwrap_or(""), mode=%body["mode"].as_str().unwrap_or(""), "submit.accepted");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
