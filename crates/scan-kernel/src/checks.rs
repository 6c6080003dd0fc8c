//! Port for custom in-page heuristics that report violation-shaped records.
//!
//! Checks are DOM-scoped: their findings are aggregated alongside rule-engine violations but
//! never attributed to components.

use std::sync::Arc;

use a11yscope_core_types::CustomViolation;
use async_trait::async_trait;
use cdp_adapter::{Cdp, PageId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::{criterion_from_tag, level_tag};
use crate::config::CheckConfig;
use crate::errors::ScanError;
use crate::scripts;

#[async_trait]
pub trait CustomCheck: Send + Sync {
    fn id(&self) -> &str;

    /// Keyboard checks move focus and only run when keyboard tests are requested.
    fn keyboard(&self) -> bool {
        false
    }

    async fn run(&self, cdp: &dyn Cdp, page: PageId) -> Result<Vec<CustomViolation>, ScanError>;
}

/// A check backed by a JS expression evaluating to an array of records.
#[derive(Clone, Debug)]
pub struct ScriptCheck {
    id: String,
    keyboard: bool,
    expression: String,
}

impl ScriptCheck {
    pub fn new(id: impl Into<String>, keyboard: bool, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keyboard,
            expression: expression.into(),
        }
    }

    pub async fn load(config: &CheckConfig) -> Result<Self, ScanError> {
        let expression = tokio::fs::read_to_string(&config.script)
            .await
            .map_err(|err| {
                ScanError::Config(format!(
                    "check {} script {}: {err}",
                    config.id,
                    config.script.display()
                ))
            })?;
        Ok(Self::new(config.id.clone(), config.keyboard, expression))
    }
}

#[async_trait]
impl CustomCheck for ScriptCheck {
    fn id(&self) -> &str {
        &self.id
    }

    fn keyboard(&self) -> bool {
        self.keyboard
    }

    async fn run(&self, cdp: &dyn Cdp, page: PageId) -> Result<Vec<CustomViolation>, ScanError> {
        let value = cdp
            .evaluate_script(page, &scripts::with_helpers(&self.expression))
            .await
            .map_err(|err| ScanError::scan_data(format!("check {}: {err}", self.id), 1))?;
        Ok(parse_records(&self.id, value))
    }
}

/// Records without an `id` take the check's id; anything unparsable is dropped.
fn parse_records(check_id: &str, value: Value) -> Vec<CustomViolation> {
    let Value::Array(items) = value else {
        warn!(target: "scan-kernel::checks", check = check_id, "check did not return an array");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|mut item| {
            if let Value::Object(map) = &mut item {
                map.entry("id")
                    .or_insert_with(|| Value::String(check_id.to_string()));
            }
            match serde_json::from_value::<CustomViolation>(item) {
                Ok(record) => Some(record),
                Err(err) => {
                    debug!(target: "scan-kernel::checks", check = check_id, %err, "dropping malformed record");
                    None
                }
            }
        })
        .collect()
}

/// Heuristics shipped with the kernel: target size (2.5.8) and, for keyboard runs,
/// focus visibility (2.4.7).
pub fn builtin_checks() -> Vec<Arc<dyn CustomCheck>> {
    vec![
        Arc::new(ScriptCheck::new("target-size", false, scripts::TARGET_SIZE_CHECK)),
        Arc::new(ScriptCheck::new("focus-visible", true, scripts::FOCUS_VISIBLE_CHECK)),
    ]
}

/// Whether a finding falls inside the requested tag set. An empty set selects everything;
/// otherwise the record's level, criterion or id must be named by one of the tags.
pub fn selected_by_tags(record: &CustomViolation, tags: &[String]) -> bool {
    if tags.is_empty() {
        return true;
    }
    tags.iter().any(|tag| {
        tag == &record.id
            || (record.level.is_some() && level_tag(tag) == record.level)
            || match (&record.criterion, criterion_from_tag(tag)) {
                (Some(criterion), Some(wanted)) => *criterion == wanted,
                _ => false,
            }
    })
}

/// Run every applicable check; failures are logged and skipped. Findings outside `tags`
/// are dropped so the summary only counts what was asked for.
pub async fn run_checks(
    checks: &[Arc<dyn CustomCheck>],
    cdp: &dyn Cdp,
    page: PageId,
    include_keyboard: bool,
    tags: &[String],
) -> (Vec<CustomViolation>, Vec<String>) {
    let mut findings = Vec::new();
    let mut warnings = Vec::new();
    for check in checks {
        if check.keyboard() && !include_keyboard {
            debug!(target: "scan-kernel::checks", check = check.id(), "keyboard check skipped");
            continue;
        }
        match check.run(cdp, page).await {
            Ok(records) => {
                let found = records.len();
                let before = findings.len();
                findings.extend(
                    records
                        .into_iter()
                        .filter(|record| selected_by_tags(record, tags)),
                );
                debug!(
                    target: "scan-kernel::checks",
                    check = check.id(),
                    found,
                    kept = findings.len() - before,
                    "check finished"
                );
            }
            Err(err) => {
                warn!(target: "scan-kernel::checks", check = check.id(), %err, "check failed; skipping");
                warnings.push(format!("check {} failed: {err}", check.id()));
            }
        }
    }
    (findings, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11yscope_core_types::{ConformanceLevel, Impact};
    use serde_json::json;

    #[test]
    fn records_inherit_the_check_id() {
        let records = parse_records(
            "target-size",
            json!([
                { "criterion": "2.5.8", "level": "AA", "impact": "serious",
                  "selector": "#tiny", "description": "too small" },
                { "id": "custom", "impact": "bogus" },
                "not a record"
            ]),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "target-size");
        assert_eq!(records[0].level, Some(ConformanceLevel::AA));
        assert_eq!(records[0].impact, Some(Impact::Serious));
    }

    #[test]
    fn non_array_results_are_empty() {
        assert!(parse_records("x", json!({ "id": "x" })).is_empty());
    }

    #[test]
    fn builtins_mark_keyboard_checks() {
        let checks = builtin_checks();
        let keyboard: Vec<_> = checks
            .iter()
            .filter(|c| c.keyboard())
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(keyboard, vec!["focus-visible"]);
    }

    fn target_size() -> CustomViolation {
        parse_records(
            "target-size",
            json!([{ "criterion": "2.5.8", "level": "AA", "impact": "serious" }]),
        )
        .remove(0)
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn tag_selection_matches_level_criterion_or_id() {
        let record = target_size();
        assert!(selected_by_tags(&record, &[]));
        assert!(!selected_by_tags(&record, &tags(&["wcag2a"])));
        assert!(!selected_by_tags(&record, &tags(&["wcag2a", "wcag21a", "best-practice"])));
        assert!(selected_by_tags(&record, &tags(&["wcag2a", "wcag22aa"])));
        assert!(selected_by_tags(&record, &tags(&["wcag258"])));
        assert!(!selected_by_tags(&record, &tags(&["wcag111"])));
        assert!(selected_by_tags(&record, &tags(&["target-size"])));
    }

    #[test]
    fn unscoped_records_only_pass_an_empty_filter() {
        let record = parse_records("odd", json!([{ "description": "no level" }])).remove(0);
        assert!(selected_by_tags(&record, &[]));
        assert!(!selected_by_tags(&record, &tags(&["wcag2aa"])));
    }

    #[tokio::test]
    async fn load_reads_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.js");
        std::fs::write(&path, "[]").unwrap();
        let check = ScriptCheck::load(&CheckConfig {
            id: "empty".into(),
            keyboard: true,
            script: path,
        })
        .await
        .unwrap();
        assert_eq!(check.id(), "empty");
        assert!(check.keyboard());

        let missing = ScriptCheck::load(&CheckConfig {
            id: "missing".into(),
            keyboard: false,
            script: dir.path().join("nope.js"),
        })
        .await;
        assert!(matches!(missing, Err(ScanError::Config(_))));
    }
}
