//! In-page rule evaluation under the retry schedule, with payload normalization.

use std::sync::Arc;

use a11yscope_core_types::RawViolation;
use cdp_adapter::{Cdp, PageId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::component_tree::{RawComponentGraph, RawGraphNode};
use crate::errors::ScanError;
use crate::framework::RootStrategy;
use crate::guard::HistoryGuard;
use crate::injector::BundleInjector;
use crate::retry::{retry, RetryExhausted, RetryPolicy};
use crate::scripts;

#[derive(Clone, Debug)]
pub struct ScanRequest {
    /// Criterion-tag filter; empty runs every rule.
    pub tags: Vec<String>,
    pub max_nodes: usize,
    pub sample_limit: usize,
}

/// Validated result of one successful in-page evaluation.
#[derive(Clone, Debug, Default)]
pub struct RawScanData {
    pub violations: Vec<RawViolation>,
    pub passes: Vec<RawViolation>,
    pub incomplete: Vec<RawViolation>,
    pub inapplicable: Vec<RawViolation>,
    pub graph: RawComponentGraph,
    pub root_strategy: RootStrategy,
    /// The page stopped exporting at its own node cap.
    pub truncated: bool,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

pub struct ScanExecutor {
    cdp: Arc<dyn Cdp>,
    injector: Arc<BundleInjector>,
    policy: RetryPolicy,
}

impl ScanExecutor {
    pub fn new(cdp: Arc<dyn Cdp>, injector: Arc<BundleInjector>, policy: RetryPolicy) -> Self {
        Self {
            cdp,
            injector,
            policy,
        }
    }

    /// Inject, evaluate and normalize, retrying the whole attempt per the policy.
    /// `observer` sees every failed attempt.
    pub async fn scan<F>(
        &self,
        page: PageId,
        request: &ScanRequest,
        mut observer: F,
    ) -> Result<RawScanData, ScanError>
    where
        F: FnMut(u32, &ScanError),
    {
        let expression = scripts::invoke(
            scripts::SCAN,
            &json!({
                "marker": self.injector.marker(),
                "runOnly": request.tags,
                "maxNodes": request.max_nodes,
                "sampleLimit": request.sample_limit,
            }),
        );

        let outcome = retry(
            &self.policy,
            |attempt, err: &ScanError| {
                warn!(target: "scan-kernel::executor", attempt, %err, "scan attempt failed");
                observer(attempt, err);
            },
            |attempt| {
                let expression = expression.as_str();
                async move {
                    debug!(target: "scan-kernel::executor", attempt, "scan attempt");
                    let mut data = self.attempt(page, expression).await?;
                    data.attempts = attempt;
                    Ok::<_, ScanError>(data)
                }
            },
        )
        .await;

        match outcome {
            Ok(data) => {
                info!(
                    target: "scan-kernel::executor",
                    violations = data.violations.len(),
                    components = data.graph.len(),
                    attempts = data.attempts,
                    "scan data collected"
                );
                Ok(data)
            }
            Err(RetryExhausted { attempts, last }) => Err(match last {
                ScanError::ScanData { reason, .. } => ScanError::scan_data(reason, attempts),
                other => ScanError::scan_data(other.to_string(), attempts),
            }),
        }
    }

    async fn attempt(&self, page: PageId, expression: &str) -> Result<RawScanData, ScanError> {
        self.injector.inject(page).await?;

        let guard = HistoryGuard::install(Arc::clone(&self.cdp), page)
            .await
            .map_err(|err| ScanError::scan_data(format!("history guard: {err}"), 0))?;
        let evaluated = self.cdp.evaluate_script(page, expression).await;
        if let Err(err) = guard.restore().await {
            warn!(target: "scan-kernel::executor", %err, "history restore failed");
        }

        let value = evaluated.map_err(|err| ScanError::scan_data(err.to_string(), 0))?;
        normalize(value)
    }
}

/// Coerce a raw payload into [`RawScanData`]. Only a non-object payload is an error.
pub fn normalize(value: Value) -> Result<RawScanData, ScanError> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ScanError::scan_data(
                format!("scan returned {} instead of an object", kind_of(&other)),
                0,
            ))
        }
    };

    let mut warnings = Vec::new();
    let violations = take_list::<RawViolation>(&mut map, "violations", &mut warnings);
    let passes = take_list::<RawViolation>(&mut map, "passes", &mut warnings);
    let incomplete = take_list::<RawViolation>(&mut map, "incomplete", &mut warnings);
    let inapplicable = take_list::<RawViolation>(&mut map, "inapplicable", &mut warnings);
    let nodes = take_list::<RawGraphNode>(&mut map, "components", &mut warnings);

    let root = map.get("componentRoot").and_then(Value::as_u64);
    let root_strategy = RootStrategy::from_label(
        map.get("rootStrategy")
            .and_then(Value::as_str)
            .unwrap_or("not-found"),
        None,
    );
    let truncated = map
        .get("truncated")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for warning in &warnings {
        warn!(target: "scan-kernel::executor", %warning, "scan payload normalized");
    }

    Ok(RawScanData {
        violations,
        passes,
        incomplete,
        inapplicable,
        graph: RawComponentGraph::new(root, nodes),
        root_strategy,
        truncated,
        attempts: 0,
        warnings,
    })
}

fn take_list<T: DeserializeOwned>(
    map: &mut serde_json::Map<String, Value>,
    field: &str,
    warnings: &mut Vec<String>,
) -> Vec<T> {
    match map.remove(field) {
        Some(Value::Array(items)) => {
            let total = items.len();
            let parsed: Vec<T> = items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect();
            if parsed.len() < total {
                warnings.push(format!(
                    "skipped {} malformed entr{} in `{field}`",
                    total - parsed.len(),
                    if total - parsed.len() == 1 { "y" } else { "ies" }
                ));
            }
            parsed
        }
        Some(other) => {
            warnings.push(format!(
                "`{field}` was {} instead of an array; using empty list",
                kind_of(&other)
            ));
            Vec::new()
        }
        None => {
            warnings.push(format!("`{field}` missing; using empty list"));
            Vec::new()
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
