use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::output::ExitStatus;
use super::runtime::{init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<ExitStatus> {
    let cli = CliArgs::parse();

    let LoadedConfig { mut config, source } = load_config(cli.config.as_deref())?;
    config.logging = cli.logging(&config.logging);
    init_logging(&config.logging)?;

    info!("Starting a11yscope v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => debug!("No configuration file; using defaults and environment"),
    }

    let ctx = CliContext::new(config, source);
    match dispatch(&cli, &ctx).await {
        Ok(status) => {
            info!(?status, "Command completed");
            Ok(status)
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
