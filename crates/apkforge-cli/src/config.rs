use anyhow::{Result, Context};
use crate::errors::{CliError, CliErrorKind};
use tracing::debug;
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

pub const DEFAULT_API_BASE: &str = "http://localhost:3000";
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_WAIT_TIMEOUT_SECS: f64 = 30.0 * 60.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_base: Option<String>,
    pub poll_interval_secs: Option<f64>,
    pub wait_timeout_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub api_base: String,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
}

impl EffectiveConfig {
    /// File values, then `APKFORGE_API_BASE`. Command-line flags are applied by the caller.
    pub fn load() -> Result<Self> {
        let cfg_path = config_file_path();
        debug!(path=?cfg_path, exists=?cfg_path.exists(), "config.load.attempt");
        let file_cfg: FileConfig = if cfg_path.exists() {
            let content = fs::read_to_string(&cfg_path).with_context(|| format!("read config {cfg_path:?}"))
                .map_err(|e| CliError::with_source(CliErrorKind::Config("failed to read config".into()), e))?;
            match toml::from_str(&content) {
                Ok(v) => { debug!("config.parse.success"); v }
                Err(e) => { debug!(error=?e, "config.parse.error"); return Err(CliError::with_source(CliErrorKind::Config("failed to parse config".into()), e).into()); }
            }
        } else { FileConfig::default() };
        let mut api_base = file_cfg.api_base.unwrap_or_else(|| DEFAULT_API_BASE.into());
        if let Ok(v) = std::env::var("APKFORGE_API_BASE") { if !v.trim().is_empty() { api_base = v.trim().to_string(); } }
        Ok(Self {
            api_base,
            poll_interval: secs(file_cfg.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS, "poll_interval_secs")?,
            wait_timeout: secs(file_cfg.wait_timeout_secs, DEFAULT_WAIT_TIMEOUT_SECS, "wait_timeout_secs")?,
        })
    }
}

/// Seconds from config or flags; negative and non-finite values are rejected.
pub fn secs(v: Option<f64>, default: f64, what: &str) -> Result<Duration> {
    let v = v.unwrap_or(default);
    Duration::try_from_secs_f64(v)
        .map_err(|_| CliError::new(CliErrorKind::Config(format!("{what} must be a non-negative number of seconds, got {v}"))).into())
}

pub fn config_dir() -> PathBuf { dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("apkforge") }
pub fn config_file_path() -> PathBuf { config_dir().join("config.toml") }
