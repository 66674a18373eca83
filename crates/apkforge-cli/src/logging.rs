//! stderr-only tracing for the CLI; stdout is reserved for command results.
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use crate::commands::LogFormat;

/// Full filter directive that overrides `--log-level`, e.g. `apkforge_cli=debug`.
pub const LOG_ENV: &str = "APKFORGE_LOG";

pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init_logging(level: &str, format: &LogFormat) -> Result<()> {
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false).without_time();
    let registry = tracing_subscriber::registry().with(filter(level));
    match format {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init()?,
        LogFormat::Text | LogFormat::Auto => registry.with(layer.compact()).try_init()?,
    }
    Ok(())
}
