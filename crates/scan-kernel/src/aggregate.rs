//! Pure fold from attributed findings to summary counts.

use std::collections::HashSet;

use a11yscope_core_types::{
    AttributedViolation, ComponentDescriptor, ConformanceLevel, CustomViolation, Impact,
    RawViolation, ScanSummary,
};

/// Highest conformance level among `tags`, e.g. `wcag2aa` and `wcag21a` give `AA`.
pub fn level_from_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Option<ConformanceLevel> {
    tags.into_iter().filter_map(|tag| level_tag(tag)).max()
}

pub(crate) fn level_tag(tag: &str) -> Option<ConformanceLevel> {
    let rest = tag.strip_prefix("wcag")?;
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    // wcag2a, wcag21aa, wcag22aaa; criterion tags have three or more digits
    if digits == 0 || digits > 2 {
        return None;
    }
    match &rest[digits..] {
        "a" => Some(ConformanceLevel::A),
        "aa" => Some(ConformanceLevel::AA),
        "aaa" => Some(ConformanceLevel::AAA),
        _ => None,
    }
}

/// `wcag111` -> `1.1.1`, `wcag1410` -> `1.4.10`.
pub fn criterion_from_tag(tag: &str) -> Option<String> {
    let digits = tag.strip_prefix("wcag")?;
    if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (principle, rest) = digits.split_at(1);
    let (guideline, criterion) = rest.split_at(1);
    Some(format!("{principle}.{guideline}.{criterion}"))
}

pub fn aggregate(
    components: &[ComponentDescriptor],
    violations: &[AttributedViolation],
    custom: &[CustomViolation],
    passes: Option<&[RawViolation]>,
    incomplete: Option<&[RawViolation]>,
) -> ScanSummary {
    let mut summary = ScanSummary {
        total_components: components.len(),
        total_passes: passes.map(<[RawViolation]>::len).unwrap_or(0),
        total_incomplete: incomplete.map(<[RawViolation]>::len).unwrap_or(0),
        ..ScanSummary::default()
    };
    let mut touched: HashSet<&str> = HashSet::new();

    for violation in violations {
        let level = level_from_tags(&violation.tags);
        let criteria: Vec<String> = violation
            .tags
            .iter()
            .filter_map(|tag| criterion_from_tag(tag))
            .collect();

        for node in &violation.nodes {
            let impact = node
                .effective_impact(violation.impact)
                .unwrap_or(Impact::Minor);
            summary.violations_by_severity.add(impact, 1);
            summary.violations_by_level.add(level, 1);
            for criterion in &criteria {
                *summary
                    .violations_by_criterion
                    .entry(criterion.clone())
                    .or_insert(0) += 1;
            }
            if let Some(component) = &node.component {
                touched.insert(component.as_str());
            }
            summary.total_violations += 1;
        }
    }

    for finding in custom {
        summary
            .violations_by_severity
            .add(finding.impact.unwrap_or(Impact::Minor), 1);
        summary.violations_by_level.add(finding.level, 1);
        if let Some(criterion) = &finding.criterion {
            *summary
                .violations_by_criterion
                .entry(criterion.clone())
                .or_insert(0) += 1;
        }
        summary.total_violations += 1;
    }

    summary.components_with_violations = touched.len();
    summary
}

/// Criterion counts ordered by count, then criterion.
pub fn top_criteria(summary: &ScanSummary, limit: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = summary
        .violations_by_criterion
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}
