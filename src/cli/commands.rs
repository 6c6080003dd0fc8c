use clap::Subcommand;

use super::config::ConfigArgs;
use super::scan::ScanArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Scan a page and attribute violations to the components that rendered them
    Scan(ScanArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
