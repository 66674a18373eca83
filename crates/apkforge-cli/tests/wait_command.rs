use assert_cmd::Command;
use axum::{extract::{Query, State}, http::header, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::{atomic::{AtomicUsize, Ordering}, Arc}};

#[derive(Clone)]
struct Mock { polls: Arc<AtomicUsize>, script: Arc<Vec<Value>> }

async fn status(State(m): State<Mock>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    assert!(q.contains_key("buildId"));
    let n = m.polls.fetch_add(1, Ordering::SeqCst);
    Json(m.script.get(n).or(m.script.last()).cloned().unwrap_or(Value::Null))
}

async fn artifact(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    assert_eq!(q.get("artifactId").map(String::as_str), Some("77"));
    ([(header::CONTENT_DISPOSITION, "attachment; filename=\"demo.apk\"")], vec![9u8; 128])
}

async fn serve(script: Vec<Value>) -> (SocketAddr, Arc<AtomicUsize>) {
    let polls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/artifact", get(artifact))
        .with_state(Mock { polls: polls.clone(), script: Arc::new(script) });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap(); });
    (addr, polls)
}

/// Runs the binary off the async runtime so the mock keeps serving.
async fn run(args: Vec<String>, cfg_home: std::path::PathBuf) -> (Option<i32>, String) {
    tokio::task::spawn_blocking(move || {
        let out = Command::cargo_bin("apkforge").unwrap().env("XDG_CONFIG_HOME", cfg_home).args(args).output().unwrap();
        (out.status.code(), String::from_utf8_lossy(&out.stdout).into_owned())
    }).await.unwrap()
}

fn args(addr: SocketAddr, rest: &[&str]) -> Vec<String> {
    let mut v = vec!["--api-base".to_string(), format!("http://{addr}")];
    v.extend(rest.iter().map(|s| s.to_string()));
    v
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_polls_until_completed_and_downloads() {
    let (addr, polls) = serve(vec![
        json!({"status": "pending"}),
        json!({"status": "running"}),
        json!({"status": "completed", "artifactId": "77"}),
    ]).await;
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().to_string_lossy().into_owned();
    let (code, stdout) = run(args(addr, &["wait", "some-id", "--interval", "0.05", "--timeout", "10", "--download", "--out", &out_dir]), tmp.path().to_path_buf()).await;
    assert_eq!(code, Some(0), "{stdout}");
    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert!(stdout.contains("\"artifactId\":\"77\""), "{stdout}");
    assert_eq!(std::fs::read(tmp.path().join("demo.apk")).unwrap(), vec![9u8; 128]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_build_exits_with_build_failure_code() {
    let (addr, _) = serve(vec![json!({"status": "running"}), json!({"status": "failed", "reason": "failure"})]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (code, _) = run(args(addr, &["wait", "some-id", "--interval", "0.05"]), tmp.path().to_path_buf()).await;
    assert_eq!(code, Some(50));
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_gives_up_at_the_deadline() {
    let (addr, polls) = serve(vec![json!({"status": "pending"})]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (code, _) = run(args(addr, &["wait", "some-id", "--interval", "0.05", "--timeout", "0.3"]), tmp.path().to_path_buf()).await;
    assert_eq!(code, Some(60));
    assert!(polls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_prints_one_json_line() {
    let (addr, _) = serve(vec![json!({"status": "running"})]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (code, stdout) = run(args(addr, &["status", "some-id"]), tmp.path().to_path_buf()).await;
    assert_eq!(code, Some(0));
    let v: Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(v, json!({"status": "running"}));
}
