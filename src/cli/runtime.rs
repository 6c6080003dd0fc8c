use std::io;
use std::path::{Path, PathBuf};

use a11yscope_kernel::{LoggingSettings, ScanConfig};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment overrides look like `A11YSCOPE__RETRY__MAX_RETRIES=4`.
pub const ENV_PREFIX: &str = "A11YSCOPE";

/// Logs go to stderr so `--format json` on stdout stays machine-readable.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .context("Invalid log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            settings
                .json
                .then(|| fmt::layer().json().with_writer(io::stderr)),
        )
        .with((!settings.json).then(|| fmt::layer().with_writer(io::stderr)))
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

pub struct LoadedConfig {
    pub config: ScanConfig,
    /// File layered over the defaults, if one was found.
    pub source: Option<PathBuf>,
}

/// `<config_dir>/a11yscope/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("a11yscope");
    path.push("config.yaml");
    Some(path)
}

/// Built-in defaults, then the config file, then `A11YSCOPE__*` environment variables.
/// An explicit path must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let defaults =
        Config::try_from(&ScanConfig::default()).context("Failed to encode default configuration")?;
    let mut builder = Config::builder().add_source(defaults);

    let source = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    };
    if let Some(path) = &source {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: ScanConfig = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(LoadedConfig { config, source })
}
