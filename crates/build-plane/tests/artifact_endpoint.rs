use std::sync::Arc;
use axum::{body::Body, http::{Request, StatusCode}, Router};
use build_plane::{build_router, test_support::{zip_bundle, FakeBuilder, MockCi}, AppState};
use serde_json::Value;
use tower::util::ServiceExt;

fn app(ci: &MockCi, root: &std::path::Path) -> Router {
    build_router(AppState::with_builder(Arc::new(ci.settings(root, &[])), Arc::new(FakeBuilder::default())).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let res = app.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn bundle_without_package_is_404() {
    let ci = MockCi::start().await;
    ci.add_artifact(1, 10, "apk-x", zip_bundle(&[("manifest.json", b"{}".as_slice())]));
    let root = tempfile::tempdir().unwrap();
    let (status, v) = get(&app(&ci, root.path()), "/api/artifact?artifactId=10").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["code"], "not_found");
}

#[tokio::test]
async fn bundle_with_two_packages_is_refused() {
    let ci = MockCi::start().await;
    ci.add_artifact(1, 11, "apk-x", zip_bundle(&[("a.apk", b"a".as_slice()), ("b.apk", b"b".as_slice())]));
    let root = tempfile::tempdir().unwrap();
    let (status, v) = get(&app(&ci, root.path()), "/api/artifact?artifactId=11").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["code"], "ambiguous_bundle");
}

#[tokio::test]
async fn unknown_artifact_keeps_upstream_status() {
    let ci = MockCi::start().await;
    let root = tempfile::tempdir().unwrap();
    let (status, v) = get(&app(&ci, root.path()), "/api/artifact?artifactId=404404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // Upstream rejection, not an empty bundle.
    assert_eq!(v["code"], "upstream_request");
}

#[tokio::test]
async fn malformed_id_never_reaches_ci() {
    let ci = MockCi::start().await;
    let root = tempfile::tempdir().unwrap();
    let app = app(&ci, root.path());
    let (status, _) = get(&app, "/api/artifact?artifactId=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/api/artifact?artifactId=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ci.request_count(), 0);
}

#[tokio::test]
async fn served_bytes_are_counted() {
    let ci = MockCi::start().await;
    ci.add_artifact(1, 12, "apk-x", zip_bundle(&[("app.apk", [1u8; 64].as_slice())]));
    let root = tempfile::tempdir().unwrap();
    let app = app(&ci, root.path());
    let res = app.clone().oneshot(Request::builder().uri("/api/artifact?artifactId=12").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = app.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
    let text = String::from_utf8(axum::body::to_bytes(res.into_body(), 1024 * 1024).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("artifact_bytes_served_total"), "{text}");
    assert!(text.contains("http_requests_total"), "{text}");
}
