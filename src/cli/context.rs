use std::path::{Path, PathBuf};

use a11yscope_kernel::ScanConfig;

pub struct CliContext {
    config: ScanConfig,
    source: Option<PathBuf>,
}

impl CliContext {
    pub fn new(config: ScanConfig, source: Option<PathBuf>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The file layered over the defaults, if any.
    pub fn config_source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
