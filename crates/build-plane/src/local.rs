//! Synchronous in-process packaging.
use std::{path::Path, sync::Arc, time::Instant};
use tracing::{info, warn};
use crate::{
    error::{BuildError, CoreResult, ToolchainStage},
    icon_server::IconServer,
    models::{ArtifactLocator, BuildRequest, BuildResult},
    package_builder::{PackageBuilder, TwaManifest},
    workspace::ICON_FILE,
};

#[derive(Clone)]
pub struct LocalBuildRunner { builder: Arc<dyn PackageBuilder> }

impl LocalBuildRunner {
    pub fn new(builder: Arc<dyn PackageBuilder>) -> Self { Self { builder } }

    /// Runs every packaging stage against `working_dir`, which must already hold the
    /// job icon. Blocks for as long as the toolchain takes; callers on an async
    /// runtime go through `spawn_blocking`.
    pub fn run_local(&self, request: &BuildRequest, working_dir: &Path) -> CoreResult<BuildResult> {
        let job_id = request.job_id();
        let started = Instant::now();
        let package_identifier = job_id.package_identifier();
        let icon_path = working_dir.join(ICON_FILE);
        if !icon_path.is_file() {
            return Err(BuildError::toolchain(ToolchainStage::Workspace, anyhow::anyhow!("icon missing at {icon_path:?}")));
        }

        {
            // Icon is only served while the generator runs.
            let icon_server = IconServer::start(icon_path).map_err(|e| BuildError::toolchain(ToolchainStage::Workspace, e))?;
            let manifest = TwaManifest::new(package_identifier.clone(), request.app_name(), request.target_url(), icon_server.icon_url(), working_dir);
            self.builder.generate_project(working_dir, &manifest).map_err(|e| stage_failed(ToolchainStage::Generate, e, request))?;
        }
        info!(job_id=%job_id, "local.generated");

        self.builder.compile(working_dir).map_err(|e| stage_failed(ToolchainStage::Compile, e, request))?;
        let package = self.builder.sign(working_dir).map_err(|e| stage_failed(ToolchainStage::Sign, e, request))?;
        let certificate_fingerprint = self.builder.certificate_fingerprint(working_dir)
            .map_err(|e| stage_failed(ToolchainStage::Fingerprint, e, request))?;

        info!(job_id=%job_id, package_id=%package_identifier, elapsed_ms=started.elapsed().as_millis() as u64, "local.completed");
        Ok(BuildResult { package_identifier, certificate_fingerprint, artifact: ArtifactLocator::Local(package) })
    }
}

fn stage_failed(stage: ToolchainStage, cause: anyhow::Error, request: &BuildRequest) -> BuildError {
    warn!(job_id=%request.job_id(), stage=%stage, error=%format!("{cause:#}"), "local.stage_failed");
    BuildError::toolchain(stage, cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_support::{tiny_png, FakeBuilder}, workspace::JobWorkspace};

    fn request() -> BuildRequest { BuildRequest::new("Demo", "https://example.com/start", tiny_png()).unwrap() }

    #[test]
    fn successful_run_reports_package_and_fingerprint() {
        let root = tempfile::tempdir().unwrap();
        let req = request();
        let ws = JobWorkspace::create(root.path(), req.job_id(), req.icon_png()).unwrap();
        let fake = Arc::new(FakeBuilder::default());
        let runner = LocalBuildRunner::new(fake.clone());
        let result = runner.run_local(&req, ws.dir()).unwrap();
        assert_eq!(result.package_identifier, req.job_id().package_identifier());
        assert_eq!(result.certificate_fingerprint, crate::test_support::FAKE_FINGERPRINT);
        match &result.artifact {
            ArtifactLocator::Local(p) => assert!(p.starts_with(ws.dir()) && p.exists()),
            other => panic!("unexpected locator {other:?}"),
        }
        // The generator saw the icon over HTTP while the server was up.
        assert_eq!(fake.fetched_icon().as_deref(), Some(tiny_png().as_slice()));
    }

    #[test]
    fn compile_failure_names_the_stage_and_stops() {
        let root = tempfile::tempdir().unwrap();
        let req = request();
        let ws = JobWorkspace::create(root.path(), req.job_id(), req.icon_png()).unwrap();
        let fake = Arc::new(FakeBuilder::failing_at(ToolchainStage::Compile));
        let err = LocalBuildRunner::new(fake.clone()).run_local(&req, ws.dir()).unwrap_err();
        match err {
            BuildError::Toolchain { stage, .. } => assert_eq!(stage, ToolchainStage::Compile),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!fake.signed(), "no stage runs after a failure");
    }

    #[test]
    fn icon_server_is_gone_after_generate_failure() {
        let root = tempfile::tempdir().unwrap();
        let req = request();
        let ws = JobWorkspace::create(root.path(), req.job_id(), req.icon_png()).unwrap();
        let fake = Arc::new(FakeBuilder::failing_at(ToolchainStage::Generate));
        assert!(LocalBuildRunner::new(fake.clone()).run_local(&req, ws.dir()).is_err());
        let addr = fake.icon_addr().expect("generator was handed an icon url");
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[test]
    fn missing_icon_is_a_workspace_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalBuildRunner::new(Arc::new(FakeBuilder::default())).run_local(&request(), dir.path()).unwrap_err();
        assert!(matches!(err, BuildError::Toolchain { stage: ToolchainStage::Workspace, .. }));
    }
}
