use anyhow::Result;

use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::output::ExitStatus;
use super::scan::cmd_scan;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<ExitStatus> {
    match cli.command.clone() {
        Commands::Scan(args) => cmd_scan(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
