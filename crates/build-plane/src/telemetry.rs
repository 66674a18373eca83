use prometheus::{TextEncoder, Encoder, Registry, IntCounter, IntCounterVec, HistogramVec, HistogramOpts, opts};
use once_cell::sync::Lazy;
use axum::{body::Body, http::{HeaderValue, Request, StatusCode}, middleware::Next, response::{IntoResponse, Response}};
use uuid::Uuid;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(HistogramOpts::new("http_request_duration_seconds", "HTTP request latency"), &["method", "path"]).unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});
pub static BUILDS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("builds_submitted_total", "Accepted build submissions by execution mode"), &["mode"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static BUILD_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("build_failures_total", "Build orchestration failures by error kind"), &["kind"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static ARTIFACT_BYTES_SERVED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("artifact_bytes_served_total", "Package bytes returned to clients").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type","text/plain; version=0.0.4")], buf).into_response()
}

/// Counts and times every request and stamps an `x-request-id` on the response.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let start = std::time::Instant::now();
    let mut resp = next.run(req).await;
    let status = resp.status().as_u16().to_string();
    HTTP_REQUESTS.with_label_values(&[method.as_str(), path_label.as_str(), status.as_str()]).inc();
    HTTP_REQUEST_DURATION.with_label_values(&[method.as_str(), path_label.as_str()]).observe(start.elapsed().as_secs_f64());
    if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        resp.headers_mut().insert("x-request-id", id);
    }
    resp
}

/// Collapse high-cardinality path segments (ids) into route templates for metric labels.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            let is_id = seg.len() >= 8 && seg.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
            if is_id || (!seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit())) { ":id" } else { seg }
        })
        .collect::<Vec<_>>()
        .join("/")
}
