//! Per-job private working areas, and the shelf that outlives them for finished
//! local packages.
use std::{collections::VecDeque, fs, io, path::{Path, PathBuf}};
use tracing::{debug, warn};
use crate::models::JobId;

pub const ICON_FILE: &str = "icon.png";

/// Working directory scoped to one job id: `<root>/<job_id>/`.
///
/// The directory is removed on drop, whatever the build outcome. Anything meant to
/// outlive the job is moved onto a [`PackageShelf`] first.
#[derive(Debug)]
pub struct JobWorkspace { dir: PathBuf, job_id: JobId }

impl JobWorkspace {
    /// Creates the directory and writes the icon into it.
    pub fn create(root: &Path, job_id: JobId, icon_png: &[u8]) -> io::Result<Self> {
        let dir = root.join(job_id.to_string());
        if dir.exists() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("working directory for {job_id} already in use")));
        }
        fs::create_dir_all(&dir)?;
        let ws = Self { dir, job_id };
        fs::write(ws.icon_path(), icon_png)?;
        debug!(job_id=%job_id, dir=?ws.dir, "workspace.created");
        Ok(ws)
    }

    pub fn dir(&self) -> &Path { &self.dir }
    pub fn job_id(&self) -> JobId { self.job_id }
    pub fn icon_path(&self) -> PathBuf { self.dir.join(ICON_FILE) }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound { warn!(job_id=%self.job_id, error=%e, "workspace.cleanup_failed"); }
        }
    }
}

/// Location of a job's working directory while it runs.
pub fn job_dir(root: &Path, job_id: JobId) -> PathBuf { root.join(job_id.to_string()) }

pub const PACKAGES_DIR: &str = "packages";

/// Signed packages of finished local builds at `<root>/packages/<job_id>.apk`.
///
/// Holds at most `capacity` packages; storing one more evicts the oldest and deletes
/// its file.
#[derive(Debug)]
pub struct PackageShelf { dir: PathBuf, capacity: usize, order: VecDeque<JobId> }

impl PackageShelf {
    pub fn new(root: &Path, capacity: usize) -> Self {
        Self { dir: root.join(PACKAGES_DIR), capacity: capacity.max(1), order: VecDeque::new() }
    }

    fn path_for(&self, job_id: JobId) -> PathBuf { self.dir.join(format!("{job_id}.apk")) }

    /// Moves `package` out of its working directory onto the shelf.
    pub fn store(&mut self, job_id: JobId, package: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let dest = self.path_for(job_id);
        if fs::rename(package, &dest).is_err() {
            // Different filesystem.
            fs::copy(package, &dest)?;
        }
        self.order.retain(|id| *id != job_id);
        self.order.push_back(job_id);
        while self.order.len() > self.capacity {
            let Some(evicted) = self.order.pop_front() else { break };
            match fs::remove_file(self.path_for(evicted)) {
                Ok(()) => debug!(job_id=%evicted, "shelf.evicted"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id=%evicted, error=%e, "shelf.evict_failed"),
            }
        }
        Ok(dest)
    }

    pub fn get(&self, job_id: JobId) -> Option<PathBuf> {
        if !self.order.contains(&job_id) { return None; }
        Some(self.path_for(job_id)).filter(|p| p.is_file())
    }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
}
