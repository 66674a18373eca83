//! Thin HTTP client for the build plane API.
use std::{path::Path, time::Duration};
use anyhow::Result;
use reqwest::{header, multipart, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use crate::errors::{CliError, CliErrorKind};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: String,
    #[serde(default)] pub artifact_id: Option<String>,
    #[serde(default)] pub reason: Option<String>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool { matches!(self.status.as_str(), "completed" | "failed") }
}

/// Package bytes plus the filename the server suggested.
#[derive(Debug)]
pub struct Download { pub filename: Option<String>, pub bytes: Vec<u8> }

#[derive(Debug, Clone)]
pub struct ApiClient { base: String, http: reqwest::Client }

impl ApiClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("apkforge-cli/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CliError::from)?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), http })
    }

    pub fn url(&self, path_and_query: &str) -> String { format!("{}{}", self.base, path_and_query) }

    pub async fn submit(&self, name: &str, url: &str, icon: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(icon).await
            .map_err(|e| CliError::with_source(CliErrorKind::Io(format!("read icon {}", icon.display())), e))?;
        let part = multipart::Part::bytes(bytes).file_name("icon.png").mime_str("image/png").map_err(CliError::from)?;
        let form = multipart::Form::new().text("name", name.to_string()).text("url", url.to_string()).part("icon", part);
        let res = self.http.post(self.url("/api/build")).multipart(form).send().await.map_err(CliError::from)?;
        let status = res.status();
        let body: Value = res.json().await.map_err(CliError::from)?;
        debug!(%status, "client.submit.response");
        if !status.is_success() || body["success"] == false {
            let msg = body["error"].as_str().unwrap_or("build rejected").to_string();
            return Err(CliError::new(CliErrorKind::Runtime(format!("{status}: {msg}"))).into());
        }
        Ok(body)
    }

    pub async fn status(&self, build_id: &str, stale_after: Option<Duration>) -> Result<JobStatus> {
        let mut req = self.http.get(self.url("/api/status")).query(&[("buildId", build_id)]);
        if let Some(d) = stale_after { req = req.query(&[("staleAfterSecs", d.as_secs())]); }
        let res = ensure_success(req.send().await.map_err(CliError::from)?).await?;
        Ok(res.json().await.map_err(CliError::from)?)
    }

    /// Fetches a remote artifact by id.
    pub async fn artifact(&self, artifact_id: &str) -> Result<Download> {
        let req = self.http.get(self.url("/api/artifact")).query(&[("artifactId", artifact_id)]);
        self.download(req).await
    }

    /// Fetches the signed package of a build the server ran locally.
    pub async fn local_package(&self, build_id: &str) -> Result<Download> {
        self.download(self.local_package_request(build_id)).await
    }

    fn local_package_request(&self, build_id: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url("/api/download")).query(&[("buildId", build_id)])
    }

    async fn download(&self, req: reqwest::RequestBuilder) -> Result<Download> {
        let res = ensure_success(req.send().await.map_err(CliError::from)?).await?;
        let filename = res.headers().get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename);
        let bytes = res.bytes().await.map_err(CliError::from)?.to_vec();
        Ok(Download { filename, bytes })
    }
}

async fn ensure_success(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() { return Ok(res); }
    let body: Value = res.json().await.unwrap_or(Value::Null);
    let msg = body["message"].as_str().or_else(|| body["error"].as_str()).unwrap_or("request failed").to_string();
    Err(CliError::new(CliErrorKind::Runtime(format!("{status}: {msg}"))).into())
}

/// `filename="x.apk"` from a Content-Disposition value, reduced to a bare file name.
pub fn disposition_filename(v: &str) -> Option<String> {
    let raw = v.split(';').map(str::trim).find_map(|p| p.strip_prefix("filename="))?;
    let name = raw.trim_matches('"');
    let base = Path::new(name).file_name()?.to_string_lossy().into_owned();
    (!base.is_empty()).then_some(base)
}
