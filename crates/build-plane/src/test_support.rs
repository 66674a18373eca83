//! Test harness utilities for unit & integration tests: fixture images and bundles,
//! a scriptable package builder, and an in-process stand-in for the GitHub Actions
//! REST surface the build plane talks to.
use std::{
    collections::HashMap,
    io::{Read, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{atomic::{AtomicBool, Ordering}, Arc, Mutex},
};
use anyhow::{bail, Context};
use axum::{
    body::Bytes,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use crate::{
    config::Settings,
    error::ToolchainStage,
    models::JobId,
    package_builder::{PackageBuilder, TwaManifest},
};

pub const FAKE_FINGERPRINT: &str = "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89";
pub const FAKE_APK: &[u8] = b"PK\x03\x04fake-signed-package";
pub const MOCK_TOKEN: &str = "test-token";
pub const MOCK_OWNER: &str = "acme";
pub const MOCK_REPO: &str = "apps";

/// Bytes that pass the PNG signature check. Not a decodable image.
pub fn tiny_png() -> Vec<u8> {
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(b"\x00\x00\x00\x0dIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00\x1f\x15\xc4\x89");
    png
}

/// Zip container with the given entries, deflated.
pub fn zip_bundle(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// `multipart/form-data` body with text fields and an optional `icon` file part.
/// Returns the content-type header value alongside the body.
pub fn multipart_body(fields: &[(&str, &str)], icon: Option<&[u8]>) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "apkforge-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes());
    }
    if let Some(icon) = icon {
        body.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"icon\"; filename=\"icon.png\"\r\nContent-Type: image/png\r\n\r\n").as_bytes());
        body.extend_from_slice(icon);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

/// Settings rooted at `work_root` with extra environment pairs layered on top.
pub fn settings_with(work_root: &Path, pairs: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    env.insert("APKFORGE_WORK_ROOT".into(), work_root.to_string_lossy().into_owned());
    Settings::from_lookup(move |k: &str| env.get(k).cloned()).expect("test settings")
}

/// [`PackageBuilder`] that mimics each toolchain stage on disk and can be told to
/// fail at one of them.
#[derive(Debug, Default)]
pub struct FakeBuilder {
    fail_at: Option<ToolchainStage>,
    icon: Mutex<Option<Vec<u8>>>,
    icon_addr: Mutex<Option<SocketAddr>>,
    signed: AtomicBool,
}

impl FakeBuilder {
    pub fn failing_at(stage: ToolchainStage) -> Self { Self { fail_at: Some(stage), ..Default::default() } }

    /// Icon bytes the generator stage downloaded from the loopback server.
    pub fn fetched_icon(&self) -> Option<Vec<u8>> { self.icon.lock().ok()?.clone() }
    pub fn icon_addr(&self) -> Option<SocketAddr> { *self.icon_addr.lock().ok()? }
    pub fn signed(&self) -> bool { self.signed.load(Ordering::SeqCst) }

    fn check(&self, stage: ToolchainStage) -> anyhow::Result<()> {
        if self.fail_at == Some(stage) { bail!("simulated {stage} failure"); }
        Ok(())
    }

    fn release_dir(working_dir: &Path) -> PathBuf { working_dir.join("app/build/outputs/apk/release") }
}

fn http_get_body(url: &str) -> anyhow::Result<(SocketAddr, Vec<u8>)> {
    let url = url::Url::parse(url)?;
    let addr: SocketAddr = format!("{}:{}", url.host_str().context("icon url host")?, url.port().context("icon url port")?).parse()?;
    let mut stream = std::net::TcpStream::connect(addr)?;
    write!(stream, "GET {} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n", url.path())?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    let split = raw.windows(4).position(|w| w == b"\r\n\r\n").context("malformed http response")?;
    if !raw.starts_with(b"HTTP/1.1 200") { bail!("icon fetch failed: {}", String::from_utf8_lossy(&raw[..split])); }
    Ok((addr, raw[split + 4..].to_vec()))
}

impl PackageBuilder for FakeBuilder {
    fn generate_project(&self, working_dir: &Path, manifest: &TwaManifest) -> anyhow::Result<()> {
        let (addr, icon) = http_get_body(&manifest.icon_url)?;
        if let Ok(mut slot) = self.icon_addr.lock() { *slot = Some(addr); }
        if let Ok(mut slot) = self.icon.lock() { *slot = Some(icon); }
        self.check(ToolchainStage::Generate)?;
        std::fs::write(working_dir.join("twa-manifest.json"), serde_json::to_vec(manifest)?)?;
        Ok(())
    }

    fn compile(&self, working_dir: &Path) -> anyhow::Result<()> {
        self.check(ToolchainStage::Compile)?;
        std::fs::create_dir_all(Self::release_dir(working_dir))?;
        Ok(())
    }

    fn sign(&self, working_dir: &Path) -> anyhow::Result<PathBuf> {
        self.check(ToolchainStage::Sign)?;
        let out = Self::release_dir(working_dir).join("app-release-signed.apk");
        std::fs::write(&out, FAKE_APK)?;
        self.signed.store(true, Ordering::SeqCst);
        Ok(out)
    }

    fn certificate_fingerprint(&self, _working_dir: &Path) -> anyhow::Result<String> {
        self.check(ToolchainStage::Fingerprint)?;
        Ok(FAKE_FINGERPRINT.to_string())
    }
}

#[derive(Debug, Default)]
struct CiState {
    dispatches: Vec<Value>,
    runs: Vec<Value>,
    artifacts: HashMap<u64, Vec<Value>>,
    bundles: HashMap<u64, Vec<u8>>,
    reject_dispatch: Option<u16>,
    requests: usize,
}

type Shared = Arc<Mutex<CiState>>;

/// In-process GitHub Actions API covering dispatch, run listing, run artifacts and
/// artifact download. Aborted on drop.
pub struct MockCi { addr: SocketAddr, state: Shared, server: tokio::task::JoinHandle<()> }

impl MockCi {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let repo = "/repos/:owner/:repo/actions";
        let app = Router::new()
            .route(&format!("{repo}/workflows/:workflow/dispatches"), post(mock_dispatch))
            .route(&format!("{repo}/workflows/:workflow/runs"), get(mock_runs))
            .route(&format!("{repo}/runs/:run_id/artifacts"), get(mock_run_artifacts))
            .route(&format!("{repo}/artifacts/:artifact_id/zip"), get(mock_download))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock ci");
        let addr = listener.local_addr().expect("mock ci addr");
        let server = tokio::spawn(async move { let _ = axum::serve(listener, app).await; });
        Self { addr, state, server }
    }

    pub fn api_base(&self) -> String { format!("http://{}", self.addr) }

    /// Settings pointing remote CI at this mock.
    pub fn settings(&self, work_root: &Path, extra: &[(&str, &str)]) -> Settings {
        let api = self.api_base();
        let mut pairs: Vec<(&str, &str)> = vec![
            ("APKFORGE_GITHUB_TOKEN", MOCK_TOKEN), ("APKFORGE_GITHUB_OWNER", MOCK_OWNER),
            ("APKFORGE_GITHUB_REPO", MOCK_REPO), ("APKFORGE_GITHUB_API", &api),
        ];
        pairs.extend_from_slice(extra);
        settings_with(work_root, &pairs)
    }

    fn with<T>(&self, f: impl FnOnce(&mut CiState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    pub fn dispatches(&self) -> Vec<Value> { self.with(|s| s.dispatches.clone()) }
    pub fn request_count(&self) -> usize { self.with(|s| s.requests) }
    pub fn reject_dispatch(&self, status: u16) { self.with(|s| s.reject_dispatch = Some(status)); }

    /// Adds (or replaces) the run tagged with `job_id` via its run-name.
    pub fn set_run(&self, run_id: u64, job_id: JobId, status: &str, conclusion: Option<&str>) {
        let run = json!({
            "id": run_id, "name": "Build APK", "display_title": job_id.artifact_name(),
            "status": status, "conclusion": conclusion,
            "html_url": format!("https://github.com/{MOCK_OWNER}/{MOCK_REPO}/actions/runs/{run_id}"),
        });
        self.with(|s| {
            s.runs.retain(|r| r["id"] != run_id);
            s.runs.insert(0, run);
        });
    }

    /// Adds an unrelated run, to check matching never picks up the wrong job.
    pub fn add_foreign_run(&self, run_id: u64, title: &str, status: &str, conclusion: Option<&str>) {
        self.with(|s| s.runs.insert(0, json!({ "id": run_id, "display_title": title, "status": status, "conclusion": conclusion })));
    }

    pub fn add_artifact(&self, run_id: u64, artifact_id: u64, name: &str, bundle: Vec<u8>) {
        self.with(|s| {
            s.artifacts.entry(run_id).or_default().push(json!({
                "id": artifact_id, "name": name, "size_in_bytes": bundle.len(), "expired": false,
            }));
            s.bundles.insert(artifact_id, bundle);
        });
    }

    /// Marks an artifact as past retention, as GitHub lists it after expiry.
    pub fn expire_artifact(&self, artifact_id: u64) {
        self.with(|s| {
            for a in s.artifacts.values_mut().flatten() {
                if a["id"] == artifact_id { a["expired"] = json!(true); }
            }
            s.bundles.remove(&artifact_id);
        });
    }
}

impl Drop for MockCi {
    fn drop(&mut self) { self.server.abort(); }
}

fn authorized(state: &Shared, headers: &HeaderMap) -> Result<(), Response> {
    if let Ok(mut s) = state.lock() { s.requests += 1; }
    let expected = format!("Bearer {MOCK_TOKEN}");
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(v) if v == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, Json(json!({"message": "Bad credentials"}))).into_response()),
    }
}

async fn mock_dispatch(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(r) = authorized(&state, &headers) { return r; }
    let mut s = state.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(code) = s.reject_dispatch {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
        return (status, Json(json!({"message": "Workflow does not have 'workflow_dispatch' trigger"}))).into_response();
    }
    s.dispatches.push(body);
    StatusCode::NO_CONTENT.into_response()
}

async fn mock_runs(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(r) = authorized(&state, &headers) { return r; }
    let s = state.lock().unwrap_or_else(|p| p.into_inner());
    Json(json!({ "total_count": s.runs.len(), "workflow_runs": s.runs })).into_response()
}

async fn mock_run_artifacts(State(state): State<Shared>, headers: HeaderMap, UrlPath(params): UrlPath<HashMap<String, String>>) -> Response {
    if let Err(r) = authorized(&state, &headers) { return r; }
    let run_id: u64 = params.get("run_id").and_then(|v| v.parse().ok()).unwrap_or_default();
    let s = state.lock().unwrap_or_else(|p| p.into_inner());
    let artifacts = s.artifacts.get(&run_id).cloned().unwrap_or_default();
    Json(json!({ "total_count": artifacts.len(), "artifacts": artifacts })).into_response()
}

async fn mock_download(State(state): State<Shared>, headers: HeaderMap, UrlPath(params): UrlPath<HashMap<String, String>>) -> Response {
    if let Err(r) = authorized(&state, &headers) { return r; }
    let artifact_id: u64 = params.get("artifact_id").and_then(|v| v.parse().ok()).unwrap_or_default();
    let s = state.lock().unwrap_or_else(|p| p.into_inner());
    match s.bundles.get(&artifact_id) {
        Some(bundle) => ([("content-type", "application/zip")], Bytes::from(bundle.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response(),
    }
}
