use clap::Parser;
use ssc_call::{logger, SessionConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ssc-call")]
#[command(about = "Peer-to-peer calls and chat over hand-copied WebRTC descriptions", version)]
struct Cli {
    #[arg(short, long, env = "SSC_CONFIG", value_name = "FILE", help = "JSON session config")]
    config: Option<PathBuf>,
    #[arg(short, long, help = "Name shown to the peer")]
    name: Option<String>,
    #[arg(long, help = "Emit gzip+base64 descriptions instead of JSON")]
    compact: bool,
    #[arg(long, help = "Same-host test mode: no ICE servers, loopback candidates")]
    local: bool,
    #[arg(long, value_name = "FILE", help = "Cache last session metadata here")]
    metadata: Option<PathBuf>,
    #[arg(long, value_name = "FILTER", help = "tracing filter (RUST_LOG wins)")]
    log: Option<String>,
}

fn load_config(cli: &Cli) -> ssc_call::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None if cli.local => SessionConfig::local(),
        None => SessionConfig::default(),
    };
    if cli.local {
        config.ice_servers.clear();
        config.include_loopback_candidates = true;
    }
    if let Some(name) = &cli.name {
        config.local_name = name.clone();
    }
    if cli.compact {
        config.compact_descriptions = true;
    }
    if let Some(path) = &cli.metadata {
        config.metadata_path = Some(path.clone());
    }
    if let Some(filter) = &cli.log {
        config.log_filter = filter.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ssc-call: {e}");
            return ExitCode::FAILURE;
        }
    };
    logger::init(&config.log_filter);

    match ssc_call::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
