pub mod artifact;
pub mod build;
pub mod download;
pub mod health;
pub mod status;

use axum::http::HeaderValue;

/// `attachment` disposition for a package download. The name is already stripped of
/// quotes; anything else a header cannot carry falls back to a generic name.
pub(crate) fn attachment(filename: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"app.apk\""))
}
