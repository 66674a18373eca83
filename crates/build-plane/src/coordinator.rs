//! Entry point for build submissions: picks the execution path and owns the
//! per-job working area.
use std::{io, sync::{Arc, Mutex, MutexGuard}, path::PathBuf};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use crate::{
    config::Settings,
    dispatch::BuildDispatcher,
    error::{BuildError, CoreResult, ToolchainStage},
    local::LocalBuildRunner,
    models::{ArtifactLocator, BuildJob, BuildMode, BuildRequest, JobId, JobState, SubmitOutcome},
    package_builder::PackageBuilder,
    telemetry::{BUILDS_SUBMITTED, BUILD_FAILURES},
    workspace::{JobWorkspace, PackageShelf},
};

pub struct BuildCoordinator {
    settings: Arc<Settings>,
    local: LocalBuildRunner,
    dispatcher: Arc<dyn BuildDispatcher>,
    // The toolchain is not safe to run twice at once on one host. The permit travels
    // with the blocking task, so dropping a submit never frees it early.
    local_slot: Arc<Semaphore>,
    packages: Arc<Mutex<PackageShelf>>,
}

fn shelf(packages: &Mutex<PackageShelf>) -> MutexGuard<'_, PackageShelf> {
    match packages.lock() { Ok(g) => g, Err(poisoned) => poisoned.into_inner() }
}

impl BuildCoordinator {
    pub fn new(settings: Arc<Settings>, builder: Arc<dyn PackageBuilder>, dispatcher: Arc<dyn BuildDispatcher>) -> Self {
        let packages = PackageShelf::new(&settings.work_root, settings.local_retain);
        Self {
            settings,
            local: LocalBuildRunner::new(builder),
            dispatcher,
            local_slot: Arc::new(Semaphore::new(1)),
            packages: Arc::new(Mutex::new(packages)),
        }
    }

    /// Decided from configuration alone, before anything is attempted.
    pub fn mode(&self) -> BuildMode {
        if self.settings.local_toolchain { BuildMode::Local } else { BuildMode::Remote }
    }

    pub async fn submit(&self, request: BuildRequest) -> CoreResult<SubmitOutcome> {
        let mut job = BuildJob::new(request.job_id(), self.mode());
        BUILDS_SUBMITTED.with_label_values(&[mode_label(job.mode)]).inc();
        info!(job_id=%job.id, mode=mode_label(job.mode), app=%request.app_name(), "build.submitted");
        let outcome = match job.mode {
            BuildMode::Local => self.submit_local(&mut job, request).await,
            BuildMode::Remote => self.submit_remote(request).await,
        };
        if let Err(e) = &outcome {
            job.advance(JobState::Failed);
            BUILD_FAILURES.with_label_values(&[e.kind()]).inc();
            warn!(job_id=%job.id, kind=e.kind(), error=%e, "build.failed");
        }
        outcome
    }

    async fn submit_remote(&self, request: BuildRequest) -> CoreResult<SubmitOutcome> {
        // Icon travels inline in the dispatch payload; the working area only
        // outlives this call on the local path.
        let workspace = self.workspace(&request)?;
        let receipt = self.dispatcher.dispatch(&request).await?;
        drop(workspace);
        Ok(SubmitOutcome::Dispatched { job_id: receipt.job_id, tracking_url: receipt.tracking_url })
    }

    async fn submit_local(&self, job: &mut BuildJob, request: BuildRequest) -> CoreResult<SubmitOutcome> {
        let permit = Arc::clone(&self.local_slot).acquire_owned().await
            .map_err(|e| BuildError::toolchain(ToolchainStage::Workspace, e))?;
        let workspace = self.workspace(&request)?;
        job.advance(JobState::Running);
        let runner = self.local.clone();
        let packages = Arc::clone(&self.packages);
        let job_id = job.id;
        let result = tokio::task::spawn_blocking(move || {
            // Drop order: workspace first, then the permit.
            let _permit = permit;
            let workspace = workspace;
            let mut result = runner.run_local(&request, workspace.dir())?;
            if let ArtifactLocator::Local(built) = &result.artifact {
                let stored = shelf(&packages).store(job_id, built)?;
                result.artifact = ArtifactLocator::Local(stored);
            }
            Ok::<_, BuildError>(result)
        }).await.map_err(|e| BuildError::Io(io::Error::new(io::ErrorKind::Other, format!("local build task aborted: {e}"))))??;
        job.advance(JobState::Completed);
        info!(job_id=%job.id, package_id=%result.package_identifier, artifact=?result.artifact, "build.completed");
        Ok(SubmitOutcome::Completed { job_id: job.id, result })
    }

    fn workspace(&self, request: &BuildRequest) -> CoreResult<JobWorkspace> {
        JobWorkspace::create(&self.settings.work_root, request.job_id(), request.icon_png())
            .map_err(|e| BuildError::toolchain(ToolchainStage::Workspace, e))
    }

    /// Signed package of a finished local build, while it is still on the shelf.
    pub fn local_artifact(&self, job_id: JobId) -> Option<PathBuf> {
        shelf(&self.packages).get(job_id)
    }
}

pub fn mode_label(mode: BuildMode) -> &'static str {
    match mode { BuildMode::Local => "local", BuildMode::Remote => "remote" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::Path, sync::atomic::{AtomicUsize, Ordering}, time::Duration};
    use async_trait::async_trait;
    use crate::{
        dispatch::DispatchReceipt,
        package_builder::TwaManifest,
        test_support::{settings_with, tiny_png, FakeBuilder, FAKE_APK},
        workspace::{job_dir, PACKAGES_DIR},
    };

    #[derive(Default)]
    struct CountingDispatcher { calls: AtomicUsize, reject: bool }

    #[async_trait]
    impl BuildDispatcher for CountingDispatcher {
        async fn dispatch(&self, request: &BuildRequest) -> CoreResult<DispatchReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject { return Err(BuildError::upstream(422, "workflow missing")); }
            Ok(DispatchReceipt { job_id: request.job_id(), tracking_url: "https://ci.example/actions".into() })
        }
    }

    fn coordinator(local: bool, root: &std::path::Path, builder: FakeBuilder, dispatcher: Arc<CountingDispatcher>) -> BuildCoordinator {
        let flag = if local { "1" } else { "0" };
        let settings = settings_with(root, &[("APKFORGE_LOCAL_TOOLCHAIN", flag)]);
        BuildCoordinator::new(Arc::new(settings), Arc::new(builder), dispatcher)
    }

    /// Holds the compile stage for `delay` and records how many compiles overlap.
    struct SlowBuilder { inner: FakeBuilder, delay: Duration, running: AtomicUsize, peak: AtomicUsize }

    impl SlowBuilder {
        fn new(delay: Duration) -> Self {
            Self { inner: FakeBuilder::default(), delay, running: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
        }
    }

    impl PackageBuilder for SlowBuilder {
        fn generate_project(&self, dir: &Path, manifest: &TwaManifest) -> anyhow::Result<()> { self.inner.generate_project(dir, manifest) }
        fn compile(&self, dir: &Path) -> anyhow::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.inner.compile(dir)
        }
        fn sign(&self, dir: &Path) -> anyhow::Result<PathBuf> { self.inner.sign(dir) }
        fn certificate_fingerprint(&self, dir: &Path) -> anyhow::Result<String> { self.inner.certificate_fingerprint(dir) }
    }

    fn request() -> BuildRequest { BuildRequest::new("Demo", "https://example.com", tiny_png()).unwrap() }

    #[tokio::test]
    async fn remote_mode_dispatches_and_discards_workspace() {
        let root = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let c = coordinator(false, root.path(), FakeBuilder::default(), dispatcher.clone());
        let req = request();
        let id = req.job_id();
        match c.submit(req).await.unwrap() {
            SubmitOutcome::Dispatched { job_id, tracking_url } => {
                assert_eq!(job_id, id);
                assert!(!tracking_url.is_empty());
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert!(!job_dir(root.path(), id).exists());
    }

    #[tokio::test]
    async fn local_mode_never_dispatches() {
        let root = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let c = coordinator(true, root.path(), FakeBuilder::default(), dispatcher.clone());
        let req = request();
        let id = req.job_id();
        match c.submit(req).await.unwrap() {
            SubmitOutcome::Completed { job_id, result } => {
                assert_eq!(job_id, id);
                assert_eq!(result.package_identifier, id.package_identifier());
            }
            other => panic!("expected local completion, got {other:?}"),
        }
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        let package = c.local_artifact(id).unwrap();
        assert!(package.starts_with(root.path().join(PACKAGES_DIR)));
        assert_eq!(std::fs::read(package).unwrap(), FAKE_APK);
        // Project, keystore and icon go with the working directory.
        assert!(!job_dir(root.path(), id).exists());
    }

    #[tokio::test]
    async fn local_packages_are_capped() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings_with(root.path(), &[("APKFORGE_LOCAL_TOOLCHAIN", "1"), ("APKFORGE_LOCAL_RETAIN", "2")]);
        let c = BuildCoordinator::new(Arc::new(settings), Arc::new(FakeBuilder::default()), Arc::new(CountingDispatcher::default()));
        let mut ids = Vec::new();
        for _ in 0..3 {
            let req = request();
            ids.push(req.job_id());
            c.submit(req).await.unwrap();
        }
        assert!(c.local_artifact(ids[0]).is_none());
        assert!(c.local_artifact(ids[1]).is_some());
        assert!(c.local_artifact(ids[2]).is_some());
        assert_eq!(std::fs::read_dir(root.path().join(PACKAGES_DIR)).unwrap().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_submit_holds_the_local_slot_until_the_toolchain_exits() {
        let root = tempfile::tempdir().unwrap();
        let builder = Arc::new(SlowBuilder::new(Duration::from_millis(600)));
        let settings = settings_with(root.path(), &[("APKFORGE_LOCAL_TOOLCHAIN", "1")]);
        let c = Arc::new(BuildCoordinator::new(Arc::new(settings), builder.clone(), Arc::new(CountingDispatcher::default())));

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.submit(request()).await }
        });
        while builder.running.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Same as a client disconnecting mid-build.
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(c.local_slot.available_permits(), 0);

        assert!(c.submit(request()).await.is_ok());
        assert_eq!(builder.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_failure_does_not_fall_back_to_remote() {
        let root = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(CountingDispatcher::default());
        let c = coordinator(true, root.path(), FakeBuilder::failing_at(ToolchainStage::Sign), dispatcher.clone());
        let req = request();
        let id = req.job_id();
        let err = c.submit(req).await.unwrap_err();
        assert!(matches!(err, BuildError::Toolchain { stage: ToolchainStage::Sign, .. }));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert!(!job_dir(root.path(), id).exists());
        assert!(c.local_artifact(id).is_none());
    }

    #[tokio::test]
    async fn rejected_dispatch_surfaces_upstream_status() {
        let root = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(CountingDispatcher { reject: true, ..Default::default() });
        let c = coordinator(false, root.path(), FakeBuilder::default(), dispatcher);
        let err = c.submit(request()).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 422);
    }
}
