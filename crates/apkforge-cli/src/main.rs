use anyhow::Result;
use apkforge_cli::{
    client::ApiClient,
    commands::{self, Cli, Commands},
    config::{secs, EffectiveConfig},
    errors::exit_code,
    logging::init_logging,
};
use clap::Parser;
use std::{process, time::{Duration, Instant}};
use tracing::{info, info_span, Instrument};

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;
    let exit = match EffectiveConfig::load() {
        Ok(cfg) => match dispatch(cli, cfg).await { Ok(()) => 0, Err(e) => { eprintln!("error: {e:#}"); exit_code(&e) } },
        Err(e) => { eprintln!("error: {e:#}"); exit_code(&e) }
    };
    info!(took_ms=%start.elapsed().as_millis(), event="cli.finished", exit_code=exit);
    if exit != 0 { process::exit(exit); }
    Ok(())
}

async fn dispatch(cli: Cli, cfg: EffectiveConfig) -> Result<()> {
    let base = cli.api_base.clone().unwrap_or(cfg.api_base.clone());
    let client = ApiClient::new(&base)?;
    match cli.command {
        Commands::Submit { name, url, icon } => {
            commands::submit::handle(&client, &name, &url, &icon).instrument(info_span!("cmd.submit")).await
        }
        Commands::Status { build_id, stale_after } => {
            commands::status::handle(&client, &build_id, stale_after).instrument(info_span!("cmd.status")).await
        }
        Commands::Fetch { artifact_id, build_id, out } => {
            commands::fetch::handle(&client, artifact_id.as_deref(), build_id.as_deref(), out.as_deref())
                .instrument(info_span!("cmd.fetch")).await
        }
        Commands::Wait { build_id, interval, timeout, stale_after, download, out } => {
            let policy = commands::wait::WaitPolicy {
                interval: match interval { Some(v) => secs(Some(v), 0.0, "--interval")?, None => cfg.poll_interval },
                timeout: match timeout { Some(v) => secs(Some(v), 0.0, "--timeout")?, None => cfg.wait_timeout },
                stale_after: stale_after.map(Duration::from_secs),
            };
            commands::wait::handle(&client, &build_id, policy, download, out.as_deref())
                .instrument(info_span!("cmd.wait")).await
        }
    }
}
