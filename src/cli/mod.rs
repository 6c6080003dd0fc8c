pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod runtime;
pub mod scan;

pub use commands::Commands;
pub use config::{cmd_config, ConfigAction, ConfigArgs};
pub use context::CliContext;
pub use env::CliArgs;
pub use output::{render, threshold_status, ExitStatus, ReportFormat};
pub use scan::{cmd_scan, ScanArgs};
