use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::context::CliContext;
use super::output::ExitStatus;
use super::runtime::{default_config_path, ENV_PREFIX};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Clone, Debug, Default)]
pub enum ConfigAction {
    /// Print the effective configuration as YAML
    #[default]
    Show,

    /// Print where configuration is read from
    Path,

    /// Validate the effective configuration
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<ExitStatus> {
    match args.action.unwrap_or_default() {
        ConfigAction::Show => {
            let yaml = serde_yaml::to_string(ctx.config())?;
            print!("{yaml}");
        }
        ConfigAction::Path => {
            match ctx.config_source() {
                Some(path) => println!("file: {}", path.display()),
                None => match default_config_path() {
                    Some(path) => println!("file: none (would read {})", path.display()),
                    None => println!("file: none"),
                },
            }
            println!("environment prefix: {ENV_PREFIX}__");
        }
        ConfigAction::Validate => {
            ctx.config()
                .validate()
                .context("Configuration is invalid")?;
            println!("Configuration is valid");
        }
    }
    Ok(ExitStatus::Success)
}
