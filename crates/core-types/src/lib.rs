//! Shared primitives for a11yscope scans.
//!
//! Everything here is plain data: the component descriptors produced by a tree
//! walk, the raw findings returned by the in-page rule engine, their
//! component-attributed counterparts, and the folded summary counts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown impact '{0}'")]
    Impact(String),
    #[error("unknown conformance level '{0}'")]
    Level(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub String);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity bucket reported by the rule engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Impact {
    pub const ALL: [Impact; 4] = [
        Impact::Critical,
        Impact::Serious,
        Impact::Moderate,
        Impact::Minor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Minor => "minor",
            Impact::Moderate => "moderate",
            Impact::Serious => "serious",
            Impact::Critical => "critical",
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Impact {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minor" => Ok(Impact::Minor),
            "moderate" => Ok(Impact::Moderate),
            "serious" => Ok(Impact::Serious),
            "critical" => Ok(Impact::Critical),
            other => Err(ParseError::Impact(other.to_string())),
        }
    }
}

/// WCAG conformance level. Ordering follows strictness: `A < AA < AAA`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ConformanceLevel {
    A,
    AA,
    AAA,
}

impl fmt::Display for ConformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConformanceLevel::A => f.write_str("A"),
            ConformanceLevel::AA => f.write_str("AA"),
            ConformanceLevel::AAA => f.write_str("AAA"),
        }
    }
}

impl FromStr for ConformanceLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(ConformanceLevel::A),
            "AA" => Ok(ConformanceLevel::AA),
            "AAA" => Ok(ConformanceLevel::AAA),
            other => Err(ParseError::Level(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Component graph
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    HostElement,
    CompositeComponent,
}

/// Opaque handle the page hands out for a DOM element. It is only meaningful
/// for the page and traversal that produced it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u64);

/// One named node of the live component graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    pub name: String,
    pub kind: NodeKind,
    /// Named ancestors from the root, ending with this node.
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementHandle>,
}

// ---------------------------------------------------------------------------
// Raw rule-engine records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(default)]
    pub html: String,
    /// Candidate selectors, most specific first. Shadow/iframe paths arrive as
    /// nested arrays and are joined with ` >>> `.
    #[serde(default, deserialize_with = "deserialize_targets")]
    pub target: Vec<String>,
    #[serde(default)]
    pub failure_summary: Option<String>,
    #[serde(default)]
    pub impact: Option<Impact>,
}

/// A rule result as returned by the engine. Violations, passes, incomplete and
/// inapplicable entries all share this shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawViolation {
    pub id: String,
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub help_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

fn deserialize_targets<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw.into_iter().filter_map(target_to_string).collect())
}

fn target_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(selector) => Some(selector),
        Value::Array(parts) => {
            let parts: Vec<String> = parts.into_iter().filter_map(target_to_string).collect();
            (!parts.is_empty()).then(|| parts.join(" >>> "))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Attributed records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributedViolationNode {
    pub html: String,
    pub target: Vec<String>,
    pub failure_summary: Option<String>,
    pub impact: Option<Impact>,
    /// Nearest owning component, if any was found in this scan's traversal.
    pub component: Option<String>,
    pub component_path: Vec<String>,
    /// `component_path` without framework-internal frames.
    pub user_component_path: Vec<String>,
    pub css_selector: Option<String>,
    pub snippet: String,
    pub is_framework_component: bool,
}

impl AttributedViolationNode {
    /// Node-level impact falls back to the rule's impact.
    pub fn effective_impact(&self, rule_impact: Option<Impact>) -> Option<Impact> {
        self.impact.or(rule_impact)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributedViolation {
    pub id: String,
    pub impact: Option<Impact>,
    pub description: String,
    pub help: String,
    pub help_url: String,
    pub tags: Vec<String>,
    pub nodes: Vec<AttributedViolationNode>,
}

/// Violation-shaped record produced by a custom in-page heuristic. These are
/// DOM-scoped and never attributed to components.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomViolation {
    pub id: String,
    #[serde(default)]
    pub criterion: Option<String>,
    #[serde(default)]
    pub level: Option<ConformanceLevel>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Value,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, impact: Impact, count: usize) {
        match impact {
            Impact::Critical => self.critical += count,
            Impact::Serious => self.serious += count,
            Impact::Moderate => self.moderate += count,
            Impact::Minor => self.minor += count,
        }
    }

    pub fn get(&self, impact: Impact) -> usize {
        match impact {
            Impact::Critical => self.critical,
            Impact::Serious => self.serious,
            Impact::Moderate => self.moderate,
            Impact::Minor => self.minor,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor
    }

    /// Instances at `threshold` or more severe.
    pub fn at_or_above(&self, threshold: Impact) -> usize {
        Impact::ALL
            .iter()
            .filter(|impact| **impact >= threshold)
            .map(|impact| self.get(*impact))
            .sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "AA")]
    pub aa: usize,
    #[serde(rename = "AAA")]
    pub aaa: usize,
    pub unleveled: usize,
}

impl LevelCounts {
    pub fn add(&mut self, level: Option<ConformanceLevel>, count: usize) {
        match level {
            Some(ConformanceLevel::A) => self.a += count,
            Some(ConformanceLevel::AA) => self.aa += count,
            Some(ConformanceLevel::AAA) => self.aaa += count,
            None => self.unleveled += count,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.aa + self.aaa + self.unleveled
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_components: usize,
    /// Node-level instances, not distinct rule ids.
    pub total_violations: usize,
    pub violations_by_severity: SeverityCounts,
    pub violations_by_level: LevelCounts,
    pub violations_by_criterion: BTreeMap<String, usize>,
    pub components_with_violations: usize,
    pub total_passes: usize,
    pub total_incomplete: usize,
}
