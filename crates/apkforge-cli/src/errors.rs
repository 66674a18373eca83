use thiserror::Error;
use std::fmt;

#[derive(Error, Debug)]
pub enum CliErrorKind {
    #[error("usage error: {0}")] Usage(String),
    #[error("config error: {0}")] Config(String),
    #[error("runtime error: {0}")] Runtime(String),
    #[error("io error: {0}")] Io(String),
    #[error("network error: {0}")] Network(String),
    /// The server answered, and the answer was a failed build.
    #[error("build failed: {0}")] BuildFailed(String),
    #[error("timed out: {0}")] Timeout(String),
}

#[derive(Debug)]
pub struct CliError { pub kind: CliErrorKind, pub source: Option<anyhow::Error> }
impl fmt::Display for CliError { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.kind.fmt(f) } }
impl std::error::Error for CliError { fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { self.source.as_ref().map(|e| e.as_ref() as _) } }

impl CliErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2, Self::Config(_) => 10, Self::Runtime(_) => 20, Self::Io(_) => 30,
            Self::Network(_) => 40, Self::BuildFailed(_) => 50, Self::Timeout(_) => 60,
        }
    }
}

impl CliError {
    pub fn new(kind: CliErrorKind) -> Self { Self { kind, source: None } }
    pub fn with_source<E: Into<anyhow::Error>>(kind: CliErrorKind, err: E) -> Self { Self { kind, source: Some(err.into()) } }
}

impl From<std::io::Error> for CliError { fn from(e: std::io::Error) -> Self { Self::with_source(CliErrorKind::Io(e.to_string()), e) } }

impl From<reqwest::Error> for CliError {
    fn from(e: reqwest::Error) -> Self { Self::with_source(CliErrorKind::Network(e.to_string()), e) }
}

/// Walks the cause chain for the first classified error; unclassified failures are runtime errors.
pub fn exit_code(e: &anyhow::Error) -> i32 {
    use std::error::Error;
    let mut cur: &dyn Error = e.as_ref();
    loop {
        if let Some(cli) = cur.downcast_ref::<CliError>() { return cli.kind.code(); }
        if cur.downcast_ref::<std::io::Error>().is_some() { return 30; }
        if cur.downcast_ref::<reqwest::Error>().is_some() { return 40; }
        match cur.source() { Some(src) => cur = src, None => break }
    }
    20
}
