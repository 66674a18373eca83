use std::path::{Path, PathBuf};
use anyhow::Result;
use tracing::info;
use crate::{client::{ApiClient, Download}, errors::{CliError, CliErrorKind}};

const FALLBACK_NAME: &str = "app.apk";

/// Where to write a download: `out` as a file, into `out` when it is a directory,
/// or the suggested name in the current directory.
pub fn target_path(out: Option<&Path>, suggested: Option<&str>) -> PathBuf {
    let name = suggested.unwrap_or(FALLBACK_NAME);
    match out {
        Some(p) if p.is_dir() => p.join(name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(name),
    }
}

pub async fn save(download: Download, out: Option<&Path>) -> Result<PathBuf> {
    let path = target_path(out, download.filename.as_deref());
    tokio::fs::write(&path, &download.bytes).await
        .map_err(|e| CliError::with_source(CliErrorKind::Io(format!("write {}", path.display())), e))?;
    info!(path=%path.display(), size_bytes=download.bytes.len(), "fetch.saved");
    Ok(path)
}

pub async fn handle(client: &ApiClient, artifact_id: Option<&str>, build_id: Option<&str>, out: Option<&Path>) -> Result<()> {
    let download = match (artifact_id, build_id) {
        (Some(a), _) => client.artifact(a).await?,
        (None, Some(b)) => client.local_package(b).await?,
        (None, None) => return Err(CliError::new(CliErrorKind::Usage("--artifact-id or --build-id required".into())).into()),
    };
    let path = save(download, out).await?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_rules() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(target_path(Some(dir.path()), Some("x.apk")), dir.path().join("x.apk"));
        assert_eq!(target_path(Some(dir.path()), None), dir.path().join(FALLBACK_NAME));
        let file = dir.path().join("named.apk");
        assert_eq!(target_path(Some(&file), Some("x.apk")), file);
        assert_eq!(target_path(None, Some("x.apk")), PathBuf::from("x.apk"));
    }
}
