//! Binary entrypoint for the APKForge build plane.
use build_plane::{build_router, config::Settings, AppState};
use tracing::info;
use tower_http::{limit::RequestBodyLimitLayer, cors::CorsLayer};
use std::time::Duration;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if std::env::var("APKFORGE_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = Settings::from_env()?;
    std::fs::create_dir_all(&settings.work_root)?;
    let addr = settings.bind_addr;
    let max_body = settings.max_upload_bytes + 64 * 1024;
    let state = AppState::from_settings(settings)?;
    info!(mode=build_plane::coordinator::mode_label(state.coordinator.mode()), remote_configured=state.settings.remote().is_ok(), "build_plane.config");
    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(max_body));
    info!(%addr, "build-plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await { tracing::warn!(error=%e, "shutdown.signal_unavailable"); std::future::pending::<()>().await; }
        info!(target: "shutdown.signal", "received Ctrl+C");
        tokio::time::sleep(Duration::from_millis(200)).await; // graceful drain window
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
