use std::fmt::{self, Write as _};
use std::process::ExitCode;

use a11yscope_core_types::{Impact, ScanSummary};
use a11yscope_kernel::{top_criteria, FrameworkKind, RootStrategy, ScanResult};
use anyhow::Result;
use clap::ValueEnum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Full result document
    Json,
    /// Human-readable digest
    Summary,
}

/// Process exit status of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// The `--fail-on` threshold was met.
    ThresholdMet,
    Fatal,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ThresholdMet => 1,
            ExitStatus::Fatal => 2,
            ExitStatus::Cancelled => 130,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

pub fn threshold_status(summary: &ScanSummary, fail_on: Option<Impact>) -> ExitStatus {
    match fail_on {
        Some(threshold) if summary.violations_by_severity.at_or_above(threshold) > 0 => {
            ExitStatus::ThresholdMet
        }
        _ => ExitStatus::Success,
    }
}

pub fn render(result: &ScanResult, format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Json => serde_json::to_string_pretty(result)?,
        ReportFormat::Summary => render_summary(result)?,
    })
}

fn render_summary(result: &ScanResult) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let summary = &result.summary;

    writeln!(out, "a11yscope report for {}", result.url)?;
    if let Some(final_url) = result.final_url.as_deref().filter(|u| *u != result.url) {
        writeln!(out, "  final URL: {final_url}")?;
    }
    writeln!(
        out,
        "  scan {} on {} in {} ms ({} attempt{})",
        result.scan_id,
        result.engine,
        result.duration_ms,
        result.attempts,
        if result.attempts == 1 { "" } else { "s" }
    )?;
    writeln!(out, "  framework: {}", describe_framework(result))?;
    writeln!(
        out,
        "  stability: {} after {} client navigation{}",
        if result.stability.is_stable { "stable" } else { "unsettled" },
        result.stability.navigation_count,
        if result.stability.navigation_count == 1 { "" } else { "s" }
    )?;
    if let Some(protocol) = &result.protocol {
        writeln!(
            out,
            "  devtools: {} commands ({} failed, {:.1}s), {} events",
            protocol.commands, protocol.command_failures, protocol.command_seconds, protocol.events
        )?;
    }
    writeln!(out)?;

    let severity = &summary.violations_by_severity;
    writeln!(
        out,
        "Violations: {} (critical {}, serious {}, moderate {}, minor {})",
        summary.total_violations,
        severity.critical,
        severity.serious,
        severity.moderate,
        severity.minor
    )?;
    let levels = &summary.violations_by_level;
    writeln!(
        out,
        "Levels: A {}, AA {}, AAA {}, unleveled {}",
        levels.a, levels.aa, levels.aaa, levels.unleveled
    )?;
    let criteria = top_criteria(summary, 5);
    if !criteria.is_empty() {
        let listed: Vec<String> = criteria
            .iter()
            .map(|(criterion, count)| format!("{criterion} ({count})"))
            .collect();
        writeln!(out, "Top criteria: {}", listed.join(", "))?;
    }
    writeln!(
        out,
        "Components: {} scanned, {} with violations",
        summary.total_components, summary.components_with_violations
    )?;
    writeln!(
        out,
        "Passes: {}, incomplete: {}, inapplicable: {}",
        summary.total_passes, summary.total_incomplete, result.inapplicable_count
    )?;

    for violation in &result.violations {
        writeln!(out)?;
        writeln!(
            out,
            "[{}] {}: {}",
            label(violation.impact),
            violation.id,
            violation.help
        )?;
        for node in &violation.nodes {
            let owner = if node.user_component_path.is_empty() {
                "(unattributed)".to_string()
            } else {
                node.user_component_path.join(" > ")
            };
            let selector = node
                .css_selector
                .clone()
                .unwrap_or_else(|| node.target.join(" "));
            writeln!(out, "    {owner}  {selector}")?;
            writeln!(out, "      {}", node.snippet)?;
        }
    }

    if !result.custom_violations.is_empty() {
        writeln!(out)?;
        writeln!(out, "Custom checks:")?;
        for finding in &result.custom_violations {
            writeln!(
                out,
                "[{}] {} {}: {}",
                label(finding.impact),
                finding.id,
                finding.criterion.as_deref().unwrap_or("-"),
                finding.description
            )?;
            if let Some(selector) = &finding.selector {
                writeln!(out, "    {selector}")?;
            }
        }
    }

    if !result.warnings.is_empty() {
        writeln!(out)?;
        writeln!(out, "Warnings:")?;
        for warning in &result.warnings {
            writeln!(out, "  - {warning}")?;
        }
    }

    Ok(out)
}

fn label(impact: Option<Impact>) -> Impact {
    impact.unwrap_or(Impact::Minor)
}

fn describe_framework(result: &ScanResult) -> String {
    let framework = &result.framework;
    let name = match framework.kind {
        FrameworkKind::React => match &framework.version {
            Some(version) => format!("React {version}"),
            None => "React".to_string(),
        },
        FrameworkKind::Unknown => "not detected".to_string(),
    };
    let root = match &result.traversal.root_strategy {
        RootStrategy::DevtoolsHook => "devtools hook".to_string(),
        RootStrategy::Container(id) => format!("container #{id}"),
        RootStrategy::Sampled => "sampled elements".to_string(),
        RootStrategy::NotFound => "no root".to_string(),
    };
    format!(
        "{name}, root via {root}, {} components visited{}",
        result.traversal.visited,
        if result.traversal.truncated { " (truncated)" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use a11yscope_core_types::SeverityCounts;

    fn summary_with(counts: SeverityCounts) -> ScanSummary {
        ScanSummary {
            violations_by_severity: counts,
            ..ScanSummary::default()
        }
    }

    #[test]
    fn threshold_counts_equal_or_worse() {
        let summary = summary_with(SeverityCounts {
            serious: 1,
            ..SeverityCounts::default()
        });
        assert_eq!(threshold_status(&summary, None), ExitStatus::Success);
        assert_eq!(
            threshold_status(&summary, Some(Impact::Critical)),
            ExitStatus::Success
        );
        assert_eq!(
            threshold_status(&summary, Some(Impact::Serious)),
            ExitStatus::ThresholdMet
        );
        assert_eq!(
            threshold_status(&summary, Some(Impact::Minor)),
            ExitStatus::ThresholdMet
        );
    }

    fn sample_result() -> ScanResult {
        use a11yscope_core_types::{AttributedViolation, AttributedViolationNode, ScanId};
        use a11yscope_kernel::{
            FrameworkInfo, StabilityReport, StabilityState, TraversalStats,
        };

        let node = AttributedViolationNode {
            html: "<img src=\"logo.png\">".into(),
            target: vec!["img".into()],
            failure_summary: None,
            impact: None,
            component: Some("SignupForm".into()),
            component_path: vec!["App".into(), "Suspense".into(), "SignupForm".into()],
            user_component_path: vec!["App".into(), "SignupForm".into()],
            css_selector: Some("#root > form > img".into()),
            snippet: "<img src=\"logo.png\">".into(),
            is_framework_component: false,
        };
        ScanResult {
            scan_id: ScanId("scan-1".into()),
            url: "https://app.test/".into(),
            final_url: Some("https://app.test/dashboard".into()),
            engine: cdp_adapter::EngineKind::Chromium,
            framework: FrameworkInfo {
                kind: FrameworkKind::React,
                version: Some("18.2.0".into()),
                root_strategy: RootStrategy::Container("root".into()),
            },
            stability: StabilityReport {
                state: StabilityState::Stable,
                navigation_count: 1,
                is_stable: true,
                final_url: Some("https://app.test/dashboard".into()),
                last_error: None,
            },
            summary: ScanSummary {
                total_components: 3,
                total_violations: 1,
                violations_by_severity: SeverityCounts {
                    critical: 1,
                    ..SeverityCounts::default()
                },
                components_with_violations: 1,
                ..ScanSummary::default()
            },
            violations: vec![AttributedViolation {
                id: "image-alt".into(),
                impact: Some(Impact::Critical),
                description: String::new(),
                help: "Images must have alternate text".into(),
                help_url: String::new(),
                tags: vec!["wcag2a".into(), "wcag111".into()],
                nodes: vec![node],
            }],
            passes: Vec::new(),
            incomplete: Vec::new(),
            inapplicable_count: 0,
            custom_violations: Vec::new(),
            components: Vec::new(),
            traversal: TraversalStats {
                visited: 7,
                root_strategy: RootStrategy::Container("root".into()),
                ..TraversalStats::default()
            },
            attempts: 1,
            warnings: vec!["component traversal stopped at the node cap".into()],
            protocol: Some(cdp_adapter::AdapterMetricsSnapshot {
                commands: 48,
                command_failures: 1,
                events: 310,
                navigations: 2,
                command_seconds: 3.5,
                ..Default::default()
            }),
            started_at: chrono::Utc::now(),
            duration_ms: 42,
        }
    }

    #[test]
    fn summary_names_owning_components() {
        let text = render(&sample_result(), ReportFormat::Summary).unwrap();
        assert!(text.contains("final URL: https://app.test/dashboard"));
        assert!(text.contains("React 18.2.0, root via container #root"));
        assert!(text.contains("stable after 1 client navigation\n"));
        assert!(text.contains("devtools: 48 commands (1 failed, 3.5s), 310 events"));
        assert!(text.contains("[critical] image-alt: Images must have alternate text"));
        assert!(text.contains("App > SignupForm  #root > form > img"));
        assert!(text.contains("  - component traversal stopped at the node cap"));
    }

    #[test]
    fn json_report_is_the_result_document() {
        let text = render(&sample_result(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["scanId"], "scan-1");
        assert_eq!(value["violations"][0]["nodes"][0]["component"], "SignupForm");
        assert_eq!(value["protocol"]["commandFailures"], 1);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::ThresholdMet.code(), 1);
        assert_eq!(ExitStatus::Fatal.code(), 2);
        assert_eq!(ExitStatus::Cancelled.code(), 130);
    }
}
