//! Pulls the package file out of a CI artifact bundle, entirely in memory.
use std::io::{Cursor, Read};
use tracing::info;
use crate::{
    ci::GitHubClient,
    error::{BuildError, CoreResult},
    models::{RetrievedArtifact, PACKAGE_EXTENSION, PACKAGE_MIME},
};

#[derive(Debug, Clone)]
pub struct ArtifactRetriever { client: GitHubClient }

impl ArtifactRetriever {
    pub fn new(client: GitHubClient) -> Self { Self { client } }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve(&self, artifact_id: &str) -> CoreResult<RetrievedArtifact> {
        let id: u64 = artifact_id.trim().parse()
            .map_err(|_| BuildError::InvalidRequest(format!("malformed artifact id '{artifact_id}'")))?;
        let bundle = self.client.download_artifact(id).await?;
        let artifact = extract_package(&bundle)?;
        info!(artifact_id=id, filename=%artifact.filename, size_bytes=artifact.bytes.len(), "artifact.retrieved");
        Ok(artifact)
    }
}

/// Finds the single `.apk` entry of a zip bundle. No entry is NotFound; several is
/// ambiguous and refused rather than guessed.
pub fn extract_package(bundle: &[u8]) -> CoreResult<RetrievedArtifact> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle))
        .map_err(|e| BuildError::upstream(502, format!("artifact bundle is not a readable zip: {e}")))?;
    let matches: Vec<usize> = (0..archive.len())
        .filter(|&i| archive.by_index_raw(i).map(|e| is_package(e.name(), e.is_dir())).unwrap_or(false))
        .collect();
    let index = match matches.as_slice() {
        [] => return Err(BuildError::NotFound(format!("no {PACKAGE_EXTENSION} entry in artifact bundle"))),
        [only] => *only,
        many => return Err(BuildError::AmbiguousBundle { count: many.len() }),
    };
    let mut entry = archive.by_index(index)
        .map_err(|e| BuildError::upstream(502, format!("artifact entry unreadable: {e}")))?;
    let filename = base_name(entry.name());
    let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut bytes)
        .map_err(|e| BuildError::upstream(502, format!("artifact entry corrupt: {e}")))?;
    Ok(RetrievedArtifact { filename, mime_type: PACKAGE_MIME, bytes })
}

fn is_package(name: &str, is_dir: bool) -> bool {
    !is_dir && name.to_ascii_lowercase().ends_with(PACKAGE_EXTENSION)
}

/// Last path segment, safe to drop into a quoted `Content-Disposition` filename.
fn base_name(entry: &str) -> String {
    entry.rsplit(['/', '\\']).next().unwrap_or(entry).replace('"', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::zip_bundle;

    #[test]
    fn single_package_is_returned_whole() {
        let apk = vec![0xA5u8; 4000];
        let bundle = zip_bundle(&[("manifest.json", b"{}".as_slice()), ("app-release-signed.apk", apk.as_slice())]);
        let got = extract_package(&bundle).unwrap();
        assert_eq!(got.filename, "app-release-signed.apk");
        assert_eq!(got.bytes.len(), 4000);
        assert_eq!(got.bytes, apk);
        assert_eq!(got.mime_type, PACKAGE_MIME);
    }

    #[test]
    fn nested_entry_reports_base_name() {
        let bundle = zip_bundle(&[("out/release/My\"App.APK", b"pk".as_slice())]);
        assert_eq!(extract_package(&bundle).unwrap().filename, "My_App.APK");
    }

    #[test]
    fn bundle_without_package_is_not_found() {
        let bundle = zip_bundle(&[("manifest.json", b"{}".as_slice()), ("readme.txt", b"hi".as_slice())]);
        let err = extract_package(&bundle).unwrap_err();
        assert!(matches!(err, BuildError::NotFound(_)), "{err}");
    }

    #[test]
    fn two_packages_are_ambiguous() {
        let bundle = zip_bundle(&[("a.apk", b"1".as_slice()), ("b.apk", b"2".as_slice())]);
        assert!(matches!(extract_package(&bundle).unwrap_err(), BuildError::AmbiguousBundle { count: 2 }));
    }

    #[test]
    fn garbage_is_an_upstream_failure() {
        let err = extract_package(b"definitely not a zip").unwrap_err();
        assert_eq!(err.status().as_u16(), 502);
        assert_eq!(err.kind(), "upstream_request");
    }
}
