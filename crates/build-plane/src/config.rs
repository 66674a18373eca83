//! Process configuration.
//!
//! Everything environment-derived is read exactly once into [`Settings`] at startup
//! and shared by reference. Components never consult the process environment
//! themselves, so tests build a `Settings` from an injected lookup instead.
use std::{net::SocketAddr, path::PathBuf};
use tracing::debug;
use crate::error::{BuildError, CoreResult};

pub const DEFAULT_SCAN_LIMIT: u32 = 30;
/// GitHub caps `per_page` for run listings at 100.
pub const MAX_SCAN_LIMIT: u32 = 100;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
/// Signed local packages kept for download before the oldest is evicted.
pub const DEFAULT_LOCAL_RETAIN: usize = 32;

#[derive(Debug, Clone)]
pub struct ToolchainSettings {
    pub java_home: PathBuf,
    pub android_sdk: PathBuf,
    /// Project generator executable (bubblewrap-compatible CLI).
    pub generator: String,
}

#[derive(Debug, Clone)]
pub struct CiSettings {
    pub token: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub workflow: String,
    pub git_ref: String,
    pub api_base: String,
    pub web_base: String,
    pub scan_limit: u32,
}

/// Fully resolved remote CI coordinates. Only obtainable through [`Settings::remote`],
/// which reports every missing value at once.
#[derive(Debug, Clone)]
pub struct RemoteCi {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    pub git_ref: String,
    pub api_base: String,
    pub web_base: String,
    pub scan_limit: u32,
}

impl RemoteCi {
    pub fn repo_api(&self) -> String { format!("{}/repos/{}/{}", self.api_base.trim_end_matches('/'), self.owner, self.repo) }
    pub fn actions_page(&self) -> String { format!("{}/{}/{}/actions", self.web_base.trim_end_matches('/'), self.owner, self.repo) }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Capability flag: the host carries a JDK + Android SDK. When false every build
    /// is dispatched remotely without attempting the local path.
    pub local_toolchain: bool,
    pub work_root: PathBuf,
    pub max_upload_bytes: usize,
    pub local_retain: usize,
    pub toolchain: ToolchainSettings,
    pub ci: CiSettings,
}

fn flag(v: Option<String>) -> bool { v.map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false) }

fn non_empty(v: Option<String>) -> Option<String> { v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) }

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = non_empty(get("APKFORGE_BIND")).unwrap_or_else(|| "0.0.0.0:3000".into()).parse()?;
        let work_root = non_empty(get("APKFORGE_WORK_ROOT")).map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("apkforge"));
        let max_upload_bytes = non_empty(get("APKFORGE_MAX_UPLOAD_BYTES")).and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0).unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let local_retain = non_empty(get("APKFORGE_LOCAL_RETAIN")).and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0).unwrap_or(DEFAULT_LOCAL_RETAIN);
        let android_sdk = non_empty(get("ANDROID_HOME")).or_else(|| non_empty(get("ANDROID_SDK_ROOT")))
            .map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/opt/android-sdk"));
        let toolchain = ToolchainSettings {
            java_home: non_empty(get("JAVA_HOME")).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/usr/lib/jvm/default")),
            android_sdk,
            generator: non_empty(get("APKFORGE_GENERATOR")).unwrap_or_else(|| "bubblewrap".into()),
        };
        let scan_limit = non_empty(get("APKFORGE_CI_SCAN_LIMIT")).and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_SCAN_LIMIT).clamp(1, MAX_SCAN_LIMIT);
        let ci = CiSettings {
            token: non_empty(get("APKFORGE_GITHUB_TOKEN")),
            owner: non_empty(get("APKFORGE_GITHUB_OWNER")),
            repo: non_empty(get("APKFORGE_GITHUB_REPO")),
            workflow: non_empty(get("APKFORGE_GITHUB_WORKFLOW")).unwrap_or_else(|| "build-apk.yml".into()),
            git_ref: non_empty(get("APKFORGE_GITHUB_REF")).unwrap_or_else(|| "main".into()),
            api_base: non_empty(get("APKFORGE_GITHUB_API")).unwrap_or_else(|| "https://api.github.com".into()),
            web_base: non_empty(get("APKFORGE_GITHUB_WEB")).unwrap_or_else(|| "https://github.com".into()),
            scan_limit,
        };
        let settings = Self { bind_addr, local_toolchain: flag(get("APKFORGE_LOCAL_TOOLCHAIN")), work_root, max_upload_bytes, local_retain, toolchain, ci };
        debug!(local_toolchain=settings.local_toolchain, work_root=?settings.work_root, ci_configured=settings.remote().is_ok(), "config.loaded");
        Ok(settings)
    }

    /// Remote CI coordinates, or a configuration error naming what is missing.
    /// Missing values never fail startup; they surface on first remote use.
    pub fn remote(&self) -> CoreResult<RemoteCi> {
        let ci = &self.ci;
        let missing: Vec<&str> = [
            ("APKFORGE_GITHUB_TOKEN", ci.token.is_none()),
            ("APKFORGE_GITHUB_OWNER", ci.owner.is_none()),
            ("APKFORGE_GITHUB_REPO", ci.repo.is_none()),
        ].into_iter().filter(|(_, absent)| *absent).map(|(name, _)| name).collect();
        match (&ci.token, &ci.owner, &ci.repo) {
            (Some(token), Some(owner), Some(repo)) => Ok(RemoteCi {
                token: token.clone(), owner: owner.clone(), repo: repo.clone(),
                workflow: ci.workflow.clone(), git_ref: ci.git_ref.clone(),
                api_base: ci.api_base.clone(), web_base: ci.web_base.clone(), scan_limit: ci.scan_limit,
            }),
            _ => Err(BuildError::Configuration(format!("remote CI not configured, missing {}", missing.join(", ")))),
        }
    }
}
