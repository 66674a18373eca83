//! Android packaging toolchain boundary.
//!
//! The orchestration core never packages anything itself. It drives a
//! [`PackageBuilder`] through four blocking stages and treats the implementation
//! as opaque. [`ToolchainBuilder`] is the production implementation: it shells out
//! to a bubblewrap-compatible project generator, the Gradle wrapper that project
//! ships, `apksigner` from the newest SDK build-tools, and `keytool`.
use std::{fs, path::{Path, PathBuf}, process::Command};
use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use crate::config::ToolchainSettings;

const KEYSTORE_FILE: &str = "android.keystore";
const KEY_ALIAS: &str = "android";
// Keystores are generated per job and discarded with the working directory.
const KEYSTORE_PASS: &str = "apkforge";
const MANIFEST_FILE: &str = "twa-manifest.json";
const LAUNCHER_NAME_CHARS: usize = 12;
/// Tail of a failing command's stderr kept in the error.
const STDERR_TAIL_CHARS: usize = 2000;

static SHA256_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SHA256:\s*([A-Fa-f0-9]{2}(?::[A-Fa-f0-9]{2}){31})").unwrap());

/// Trusted-web-activity project description handed to the generator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TwaManifest {
    pub package_id: String,
    pub host: String,
    pub name: String,
    pub launcher_name: String,
    pub display: &'static str,
    pub theme_color: &'static str,
    pub navigation_color: &'static str,
    pub background_color: &'static str,
    pub start_url: String,
    pub icon_url: String,
    pub app_version: &'static str,
    pub app_version_code: u32,
    pub shortcuts: Vec<serde_json::Value>,
    pub splash_screen_fade_out_duration: u32,
    pub enable_notifications: bool,
    pub signing_key: SigningKey,
    pub generator_app: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SigningKey { pub path: PathBuf, pub alias: &'static str }

impl TwaManifest {
    pub fn new(package_id: String, app_name: &str, target: &url::Url, icon_url: String, working_dir: &Path) -> Self {
        let mut start_url = target.path().to_string();
        if let Some(q) = target.query() { start_url.push('?'); start_url.push_str(q); }
        Self {
            package_id,
            host: target.host_str().unwrap_or_default().to_string(),
            name: app_name.to_string(),
            launcher_name: app_name.chars().take(LAUNCHER_NAME_CHARS).collect(),
            display: "standalone",
            theme_color: "#000000",
            navigation_color: "#000000",
            background_color: "#ffffff",
            start_url,
            icon_url,
            app_version: "1.0.0",
            app_version_code: 1,
            shortcuts: Vec::new(),
            splash_screen_fade_out_duration: 300,
            enable_notifications: true,
            signing_key: SigningKey { path: working_dir.join(KEYSTORE_FILE), alias: KEY_ALIAS },
            generator_app: "apkforge",
        }
    }
}

/// Opaque packaging capability. Every stage blocks for as long as the toolchain
/// needs and reports failure through its `Err`.
pub trait PackageBuilder: Send + Sync + 'static {
    /// Generate the Android project into `working_dir`. The icon is reachable at
    /// `manifest.icon_url` only for the duration of this call.
    fn generate_project(&self, working_dir: &Path, manifest: &TwaManifest) -> Result<()>;
    fn compile(&self, working_dir: &Path) -> Result<()>;
    /// Sign the release build, returning the signed package path.
    fn sign(&self, working_dir: &Path) -> Result<PathBuf>;
    /// SHA-256 fingerprint of the signing certificate, colon-separated hex.
    fn certificate_fingerprint(&self, working_dir: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ToolchainBuilder { settings: ToolchainSettings }

impl ToolchainBuilder {
    pub fn new(settings: ToolchainSettings) -> Self { Self { settings } }

    fn jdk_bin(&self, name: &str) -> PathBuf {
        let exe = if cfg!(windows) { format!("{name}.exe") } else { name.to_string() };
        self.settings.java_home.join("bin").join(exe)
    }

    fn env(&self, cmd: &mut Command) {
        cmd.env("JAVA_HOME", &self.settings.java_home);
        cmd.env("ANDROID_HOME", &self.settings.android_sdk);
    }

    fn release_dir(working_dir: &Path) -> PathBuf { working_dir.join("app").join("build").join("outputs").join("apk").join("release") }

    fn ensure_keystore(&self, working_dir: &Path) -> Result<()> {
        let keystore = working_dir.join(KEYSTORE_FILE);
        if keystore.exists() { return Ok(()); }
        let mut cmd = Command::new(self.jdk_bin("keytool"));
        cmd.args(["-genkeypair", "-keystore"]).arg(&keystore)
            .args(["-alias", KEY_ALIAS, "-keyalg", "RSA", "-keysize", "2048", "-validity", "10000"])
            .args(["-storepass", KEYSTORE_PASS, "-keypass", KEYSTORE_PASS])
            .args(["-dname", "CN=APKForge, OU=Builds, O=APKForge, C=US"]);
        run(&mut cmd, "keytool -genkeypair").map(|_| ())
    }
}

impl PackageBuilder for ToolchainBuilder {
    fn generate_project(&self, working_dir: &Path, manifest: &TwaManifest) -> Result<()> {
        let manifest_path = working_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_vec_pretty(manifest)?).with_context(|| format!("write {manifest_path:?}"))?;
        let mut cmd = Command::new(&self.settings.generator);
        self.env(&mut cmd);
        cmd.current_dir(working_dir)
            .arg("update")
            .arg("--skipVersionUpgrade")
            .arg(format!("--manifest={}", manifest_path.display()));
        run(&mut cmd, &self.settings.generator).map(|_| ())
    }

    fn compile(&self, working_dir: &Path) -> Result<()> {
        // Gradle reads `sdk.dir` from local.properties; backslashes must be escaped.
        let sdk = self.settings.android_sdk.to_string_lossy().replace('\\', "\\\\");
        fs::write(working_dir.join("local.properties"), format!("sdk.dir={sdk}\n"))?;
        self.ensure_keystore(working_dir)?;
        let wrapper = if cfg!(windows) { working_dir.join("gradlew.bat") } else { working_dir.join("gradlew") };
        if !wrapper.exists() { bail!("generated project has no gradle wrapper at {wrapper:?}"); }
        let mut cmd = Command::new(&wrapper);
        self.env(&mut cmd);
        cmd.current_dir(working_dir).args(["assembleRelease", "--no-daemon", "--no-scan", "--quiet"]);
        run(&mut cmd, "gradlew assembleRelease").map(|_| ())
    }

    fn sign(&self, working_dir: &Path) -> Result<PathBuf> {
        let build_tools = latest_build_tools(&self.settings.android_sdk)?;
        let apksigner = build_tools.join("lib").join("apksigner.jar");
        let release = Self::release_dir(working_dir);
        let input = release.join("app-release-unsigned.apk");
        let output = release.join("app-release-signed.apk");
        if !input.exists() { bail!("unsigned package missing at {input:?}"); }
        let mut cmd = Command::new(self.jdk_bin("java"));
        cmd.args(["-Xmx1024M", "-Xss1m", "-jar"]).arg(&apksigner)
            .args(["sign", "--ks"]).arg(working_dir.join(KEYSTORE_FILE))
            .args(["--ks-key-alias", KEY_ALIAS])
            .arg("--ks-pass").arg(format!("pass:{KEYSTORE_PASS}"))
            .arg("--key-pass").arg(format!("pass:{KEYSTORE_PASS}"))
            .arg("--out").arg(&output).arg(&input);
        run(&mut cmd, "apksigner sign")?;
        info!(package=?output, build_tools=?build_tools, "toolchain.signed");
        Ok(output)
    }

    fn certificate_fingerprint(&self, working_dir: &Path) -> Result<String> {
        let mut cmd = Command::new(self.jdk_bin("keytool"));
        cmd.args(["-list", "-v", "-keystore"]).arg(working_dir.join(KEYSTORE_FILE))
            .args(["-alias", KEY_ALIAS, "-storepass", KEYSTORE_PASS]);
        let out = run(&mut cmd, "keytool -list")?;
        parse_sha256_fingerprint(&out).ok_or_else(|| anyhow!("keytool output carried no SHA256 fingerprint"))
    }
}

/// Runs a command to completion, returning stdout. Non-zero exit carries the stderr tail.
fn run(cmd: &mut Command, what: &str) -> Result<String> {
    debug!(command=%exec_label(cmd, what), "toolchain.exec");
    let output = cmd.output().with_context(|| format!("failed to start {what}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
        let tail: String = stderr.chars().skip(skip).collect();
        bail!("{what} exited with {}: {}", output.status, tail.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Program file name plus `what`. Arguments stay out of logs since they carry keystore passwords.
fn exec_label(cmd: &Command, what: &str) -> String {
    let program = Path::new(cmd.get_program()).file_name().unwrap_or(cmd.get_program());
    format!("{what} ({})", program.to_string_lossy())
}

/// Extracts the `SHA256: AA:BB:..` certificate fingerprint from `keytool -list -v` output.
pub fn parse_sha256_fingerprint(output: &str) -> Option<String> {
    SHA256_LINE.captures(output).map(|c| c[1].to_ascii_uppercase())
}

/// Newest `build-tools/<version>` directory of an SDK, by numeric version order.
pub fn latest_build_tools(sdk: &Path) -> Result<PathBuf> {
    let root = sdk.join("build-tools");
    let mut versions: Vec<(Vec<u64>, PathBuf)> = fs::read_dir(&root)
        .with_context(|| format!("read {root:?}"))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| {
            let key = e.file_name().to_string_lossy().split(|c: char| !c.is_ascii_digit())
                .filter(|s| !s.is_empty()).filter_map(|s| s.parse().ok()).collect();
            (key, e.path())
        })
        .collect();
    versions.sort();
    versions.pop().map(|(_, p)| p).ok_or_else(|| anyhow!("no build-tools found under {root:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_parsed_from_keytool_listing() {
        let out = "Alias name: android\nCertificate fingerprints:\n\t SHA1: 11:22\n\t SHA256: ab:CD:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd\nSignature algorithm name: SHA256withRSA\n";
        assert_eq!(parse_sha256_fingerprint(out).as_deref(), Some("AB:CD:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD"));
        assert!(parse_sha256_fingerprint("Signature algorithm name: SHA256withRSA").is_none());
    }

    #[test]
    fn newest_build_tools_wins_numerically() {
        let sdk = tempfile::tempdir().unwrap();
        for v in ["9.0.0", "34.0.0", "33.0.2"] { fs::create_dir_all(sdk.path().join("build-tools").join(v)).unwrap(); }
        fs::write(sdk.path().join("build-tools").join("99.0.0.txt"), b"").unwrap();
        let latest = latest_build_tools(sdk.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "34.0.0");
        let empty = tempfile::tempdir().unwrap();
        assert!(latest_build_tools(empty.path()).is_err());
    }

    #[test]
    fn manifest_carries_target_and_short_launcher_name() {
        let url = url::Url::parse("https://example.com/app/start?src=twa").unwrap();
        let m = TwaManifest::new("com.apkforge.wabc".into(), "A Very Long App Name", &url, "http://127.0.0.1:9/icon.png".into(), Path::new("/w"));
        assert_eq!(m.host, "example.com");
        assert_eq!(m.start_url, "/app/start?src=twa");
        assert_eq!(m.launcher_name, "A Very Long ");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["packageId"], "com.apkforge.wabc");
        assert_eq!(v["signingKey"]["alias"], "android");
        assert_eq!(v["iconUrl"], "http://127.0.0.1:9/icon.png");
    }

    #[test]
    fn failing_command_reports_stderr() {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd"); c.args(["/C", "echo boom 1>&2 && exit 3"]); c
        } else {
            let mut c = Command::new("sh"); c.args(["-c", "echo boom >&2; exit 3"]); c
        };
        let err = run(&mut cmd, "fixture step").unwrap_err().to_string();
        assert!(err.contains("fixture step exited") && err.contains("boom"), "{err}");
    }

    #[test]
    fn exec_label_omits_keystore_secrets() {
        let mut cmd = Command::new("/usr/lib/jvm/default/bin/keytool");
        cmd.args(["-list", "-v", "-alias", KEY_ALIAS, "-storepass", KEYSTORE_PASS])
            .arg("--ks-pass").arg(format!("pass:{KEYSTORE_PASS}"));
        let label = exec_label(&cmd, "keytool -list");
        assert_eq!(label, "keytool -list (keytool)");
        assert!(!label.contains(KEYSTORE_PASS));
    }
}
