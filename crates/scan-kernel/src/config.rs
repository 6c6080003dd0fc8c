//! Explicit scan configuration threaded into every kernel component.

use std::path::PathBuf;
use std::time::Duration;

use cdp_adapter::{CdpConfig, EngineKind};
use serde::{Deserialize, Serialize};

use crate::errors::ScanError;
use crate::retry::{Backoff, RetryPolicy};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub browser: BrowserSettings,
    pub stability: StabilitySettings,
    pub retry: RetrySettings,
    pub bundle: BundleSettings,
    pub traversal: TraversalSettings,
    pub logging: LoggingSettings,
    /// Extra in-page heuristics loaded from script files.
    pub checks: Vec<CheckConfig>,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.bundle.marker.trim().is_empty() {
            return Err(ScanError::Config("bundle.marker must not be empty".into()));
        }
        if self.traversal.max_nodes == 0 {
            return Err(ScanError::Config("traversal.max_nodes must be positive".into()));
        }
        if self.stability.navigation_probe_ms == 0 {
            return Err(ScanError::Config(
                "stability.navigation_probe_ms must be positive".into(),
            ));
        }
        if self.browser.navigation_timeout_ms == 0 {
            return Err(ScanError::Config(
                "browser.navigation_timeout_ms must be positive".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ScanError::Config(format!(
                "retry.max_delay_ms ({}) must be at least retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }
        if self.browser.engine == EngineKind::Webkit && self.browser.websocket_url.is_none() {
            tracing::warn!(
                target: "scan-kernel::config",
                "webkit selected without browser.websocket_url; acquisition will fail"
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub engine: EngineKind,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub websocket_url: Option<String>,
    pub user_data_dir: Option<PathBuf>,
    pub navigation_timeout_ms: u64,
    pub command_deadline_ms: u64,
    pub no_sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        let base = CdpConfig::default();
        Self {
            engine: EngineKind::default(),
            headless: base.headless,
            executable: None,
            websocket_url: None,
            user_data_dir: None,
            navigation_timeout_ms: 30_000,
            command_deadline_ms: base.default_deadline_ms,
            no_sandbox: base.no_sandbox,
        }
    }
}

impl BrowserSettings {
    pub fn cdp_config(&self) -> CdpConfig {
        CdpConfig {
            engine: self.engine,
            executable: self.executable.clone(),
            user_data_dir: self.user_data_dir.clone(),
            headless: self.headless,
            default_deadline_ms: self.command_deadline_ms,
            websocket_url: self.websocket_url.clone(),
            no_sandbox: self.no_sandbox,
            ..CdpConfig::default()
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilitySettings {
    pub network_idle_timeout_ms: u64,
    pub network_quiet_window_ms: u64,
    pub settle_delay_ms: u64,
    pub navigation_probe_ms: u64,
    pub max_navigations: u32,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            network_idle_timeout_ms: 5_000,
            network_quiet_window_ms: 500,
            settle_delay_ms: 500,
            navigation_probe_ms: 1_000,
            max_navigations: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            backoff: Backoff::Exponential,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    /// Built rule-engine bundle that defines `window[marker]`.
    pub path: PathBuf,
    pub marker: String,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist/a11yscope-bundle.js"),
            marker: "__A11YSCOPE__".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
    pub max_nodes: usize,
    /// DOM elements probed by the last root-detection tier.
    pub sample_limit: usize,
    pub include_host_elements: bool,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            max_nodes: 50_000,
            sample_limit: 500,
            include_host_elements: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckConfig {
    pub id: String,
    #[serde(default)]
    pub keyboard: bool,
    /// File holding a JS expression that evaluates to an array of violation records.
    pub script: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.browser.navigation_timeout_ms, 30_000);
        assert_eq!(cfg.stability.max_navigations, 5);
        assert_eq!(cfg.stability.network_idle_timeout_ms, 5_000);
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.retry.backoff, Backoff::Exponential);
        assert_eq!(cfg.traversal.max_nodes, 50_000);
        assert_eq!(cfg.bundle.marker, "__A11YSCOPE__");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let cfg: ScanConfig = serde_json::from_value(serde_json::json!({
            "browser": { "engine": "firefox" },
            "retry": { "max_retries": 0, "backoff": "linear" }
        }))
        .unwrap();
        assert_eq!(cfg.browser.engine, EngineKind::Firefox);
        assert_eq!(cfg.browser.command_deadline_ms, 30_000);
        assert_eq!(cfg.retry.policy().attempts(), 1);
        assert_eq!(cfg.retry.backoff, Backoff::Linear);
        assert_eq!(cfg.stability.settle_delay_ms, 500);
    }

    #[test]
    fn validation_rejects_zero_caps() {
        let mut cfg = ScanConfig::default();
        cfg.traversal.max_nodes = 0;
        assert!(matches!(cfg.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn retry_ceiling_below_base_delay_is_rejected() {
        let mut cfg = ScanConfig::default();
        cfg.retry.base_delay_ms = 5_000;
        cfg.retry.max_delay_ms = 1_000;
        match cfg.validate() {
            Err(ScanError::Config(msg)) => assert!(msg.contains("retry.max_delay_ms")),
            other => panic!("unexpected {other:?}"),
        }

        cfg.retry.max_delay_ms = 5_000;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.policy().delay_for(30), Duration::from_millis(5_000));
    }

    #[test]
    fn browser_settings_flow_into_cdp_config() {
        let mut settings = BrowserSettings::default();
        settings.engine = EngineKind::Webkit;
        settings.websocket_url = Some("ws://127.0.0.1:9222/devtools/browser/x".into());
        settings.command_deadline_ms = 1_234;
        let cdp = settings.cdp_config();
        assert_eq!(cdp.engine, EngineKind::Webkit);
        assert_eq!(cdp.default_deadline_ms, 1_234);
        assert!(cdp.websocket_url.is_some());
    }
}
