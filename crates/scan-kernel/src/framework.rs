//! Detect the UI framework and how its component root can be reached.

use std::sync::Arc;

use cdp_adapter::{Cdp, PageId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::scripts;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkKind {
    React,
    #[default]
    Unknown,
}

/// Which tier of root detection succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "tier", content = "container")]
pub enum RootStrategy {
    DevtoolsHook,
    Container(String),
    Sampled,
    #[default]
    NotFound,
}

impl RootStrategy {
    /// Parse the page's strategy label; `container` carries the matched element id.
    pub fn from_label(label: &str, container: Option<&str>) -> Self {
        match label {
            "devtools-hook" => Self::DevtoolsHook,
            "container" => Self::Container(container.unwrap_or_default().to_string()),
            "sampled" => Self::Sampled,
            _ => Self::NotFound,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkInfo {
    pub kind: FrameworkKind,
    pub version: Option<String>,
    pub root_strategy: RootStrategy,
}

impl FrameworkInfo {
    fn from_value(value: &Value) -> Self {
        let kind = match value.get("kind").and_then(Value::as_str) {
            Some("react") => FrameworkKind::React,
            _ => FrameworkKind::Unknown,
        };
        let version = value
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);
        let root_strategy = RootStrategy::from_label(
            value
                .get("rootStrategy")
                .and_then(Value::as_str)
                .unwrap_or("not-found"),
            value.get("container").and_then(Value::as_str),
        );
        Self {
            kind,
            version,
            root_strategy,
        }
    }
}

pub struct FrameworkDetector {
    cdp: Arc<dyn Cdp>,
    sample_limit: usize,
}

impl FrameworkDetector {
    pub fn new(cdp: Arc<dyn Cdp>, sample_limit: usize) -> Self {
        Self { cdp, sample_limit }
    }

    /// Never fails; an evaluation error reports `Unknown`.
    pub async fn detect(&self, page: PageId) -> FrameworkInfo {
        let expression = scripts::invoke(
            scripts::DETECT_FRAMEWORK,
            &json!({ "sampleLimit": self.sample_limit }),
        );
        match self.cdp.evaluate_script(page, &expression).await {
            Ok(value) => {
                let info = FrameworkInfo::from_value(&value);
                info!(
                    target: "scan-kernel::framework",
                    kind = ?info.kind,
                    version = info.version.as_deref().unwrap_or("unknown"),
                    root = ?info.root_strategy,
                    "framework detected"
                );
                info
            }
            Err(err) => {
                warn!(target: "scan-kernel::framework", %err, "framework detection failed");
                FrameworkInfo::default()
            }
        }
    }
}
