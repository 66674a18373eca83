use std::path::PathBuf;
use clap::{Parser, Subcommand};

pub mod fetch;
pub mod status;
pub mod submit;
pub mod wait;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum LogFormat { Auto, Text, Json }

#[derive(Parser, Debug)]
#[command(name = "apkforge", version, about = "Build Android packages from web apps through an APKForge build plane")]
pub struct Cli {
    /// Log level: trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    pub log_level: String,
    /// Log format: auto|text|json
    #[arg(long, default_value = "auto")]
    pub log_format: LogFormat,
    /// Build plane base URL (overrides APKFORGE_API_BASE and the config file)
    #[arg(long, global = true)]
    pub api_base: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a build; prints the server response as JSON
    Submit {
        #[arg(long)] name: String,
        #[arg(long)] url: String,
        /// PNG icon file
        #[arg(long)] icon: PathBuf,
    },
    /// Poll a build once
    Status {
        build_id: String,
        /// Treat a build no CI run has picked up as failed after this many seconds
        #[arg(long)] stale_after: Option<u64>,
    },
    /// Download a finished package
    Fetch {
        /// Remote artifact id reported by `status`
        #[arg(long, conflicts_with = "build_id", required_unless_present = "build_id")] artifact_id: Option<String>,
        /// Local build id (served from the build plane's own disk)
        #[arg(long)] build_id: Option<String>,
        /// Output file or directory (default: server-suggested name in the current directory)
        #[arg(long)] out: Option<PathBuf>,
    },
    /// Poll until the build finishes, fails or the timeout passes
    Wait {
        build_id: String,
        /// Seconds between polls
        #[arg(long)] interval: Option<f64>,
        /// Give up after this many seconds
        #[arg(long)] timeout: Option<f64>,
        /// Also passed to the server as the staleness bound
        #[arg(long)] stale_after: Option<u64>,
        /// Download the package once completed
        #[arg(long, default_value_t = false)] download: bool,
        #[arg(long)] out: Option<PathBuf>,
    },
}
