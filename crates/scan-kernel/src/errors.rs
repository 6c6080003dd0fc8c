use cdp_adapter::{AdapterError, AdapterErrorKind, LaunchError};
use thiserror::Error;

/// Session-level failures. Anything not listed here is absorbed by the component that hit it
/// and shows up as reduced completeness plus a log line.
#[derive(Debug, Error, Clone)]
pub enum ScanError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("bundle injection failed: {reason}")]
    Injection { reason: String },
    #[error("scan data unavailable after {attempts} attempt(s): {reason}")]
    ScanData { reason: String, attempts: u32 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScanError {
    pub fn injection(reason: impl Into<String>) -> Self {
        Self::Injection {
            reason: reason.into(),
        }
    }

    pub fn scan_data(reason: impl Into<String>, attempts: u32) -> Self {
        Self::ScanData {
            reason: reason.into(),
            attempts,
        }
    }

    /// Map an adapter failure from the navigation step.
    pub fn from_navigation(url: &str, timeout_ms: u64, err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::NavTimeout => Self::NavigationTimeout {
                url: url.to_string(),
                timeout_ms,
            },
            _ => Self::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            },
        }
    }

    /// Only injection failures may be re-attempted, and only by the scan retry schedule.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Injection { .. })
    }

    /// Remediation text for launch failures, when the engine supplied one.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::Launch(err) => err.remediation.as_deref(),
            Self::Injection { .. } => {
                Some("Build the measurement bundle or point bundle.path at an existing file.")
            }
            _ => None,
        }
    }
}
