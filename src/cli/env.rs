use clap::{ArgAction, Parser};
use std::path::PathBuf;

use a11yscope_kernel::LoggingSettings;

use super::commands::Commands;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl CliArgs {
    /// Flags win over the configured logging section.
    pub fn logging(&self, configured: &LoggingSettings) -> LoggingSettings {
        let level = if self.quiet {
            "error".to_string()
        } else {
            match self.verbose {
                0 => configured.level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            }
        };
        LoggingSettings {
            level,
            json: configured.json || self.log_json,
        }
    }
}
