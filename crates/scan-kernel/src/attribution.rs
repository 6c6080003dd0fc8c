//! Attribution of rule-engine findings to the component that owns the failing element.

use std::collections::HashMap;
use std::sync::Arc;

use a11yscope_core_types::{
    AttributedViolation, AttributedViolationNode, ComponentDescriptor, ElementHandle, RawNode,
    RawViolation,
};
use async_trait::async_trait;
use cdp_adapter::{AdapterError, Cdp, PageId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::component_tree::ComponentIndex;
use crate::scripts;

const SNIPPET_LIMIT: usize = 200;

/// Where one target selector led in the live page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetResolution {
    pub found: bool,
    pub error: Option<String>,
    pub selector: String,
    /// Generated selector for the matched element.
    pub canonical: Option<String>,
    /// Composite graph node ids from the element's framework instance upwards.
    pub direct: Vec<u64>,
    /// Handles of the element and its DOM ancestors, nearest first.
    pub ancestors: Vec<ElementHandle>,
}

#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// One resolution per selector, in order.
    async fn resolve(&self, selectors: &[String]) -> Result<Vec<TargetResolution>, AdapterError>;
}

/// Resolves selectors in the scanned page with a single batched evaluation.
pub struct PageTargetResolver {
    cdp: Arc<dyn Cdp>,
    page: PageId,
}

impl PageTargetResolver {
    pub fn new(cdp: Arc<dyn Cdp>, page: PageId) -> Self {
        Self { cdp, page }
    }
}

#[async_trait]
impl TargetResolver for PageTargetResolver {
    async fn resolve(&self, selectors: &[String]) -> Result<Vec<TargetResolution>, AdapterError> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }
        let expression = scripts::invoke(scripts::RESOLVE_TARGETS, &json!({ "selectors": selectors }));
        let value = self.cdp.evaluate_script(self.page, &expression).await?;
        serde_json::from_value(value).map_err(|err| {
            AdapterError::internal(format!("target resolution returned an unexpected shape: {err}"))
        })
    }
}

/// Component names that belong to the framework or routing layer rather than the app.
const FRAMEWORK_NAMES: &[&str] = &[
    "Suspense",
    "ErrorBoundary",
    "StrictMode",
    "Fragment",
    "Profiler",
    "Provider",
    "Consumer",
    "Context",
    "ForwardRef",
    "Memo",
    "Router",
    "BrowserRouter",
    "HashRouter",
    "MemoryRouter",
    "Routes",
    "Route",
    "RenderedRoute",
    "Outlet",
    "Navigate",
    "DataRoutes",
    "AppRouter",
    "ServerRoot",
    "LayoutRouter",
    "InnerLayoutRouter",
    "OuterLayoutRouter",
    "RedirectBoundary",
    "RedirectErrorBoundary",
    "NotFoundBoundary",
    "NotFoundErrorBoundary",
    "LoadingBoundary",
    "ScrollAndFocusHandler",
    "InnerScrollAndFocusHandler",
    "RenderFromTemplateContext",
    "HotReload",
    "ReactDevOverlay",
    "HistoryUpdater",
    "PathnameContextProviderAdapter",
    "Head",
];

pub fn is_framework_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.starts_with('_') {
        return true;
    }
    if FRAMEWORK_NAMES.contains(&name) {
        return true;
    }
    if name.contains('.')
        && name
            .split('.')
            .any(|segment| FRAMEWORK_NAMES.contains(&segment))
    {
        return true;
    }
    name.contains("Suspense")
        || name.contains("ErrorBoundary")
        || name.ends_with("Provider")
        || name.ends_with("Context")
}

/// `path` without framework-internal frames.
pub fn user_path(path: &[String]) -> Vec<String> {
    path.iter()
        .filter(|name| !is_framework_name(name))
        .cloned()
        .collect()
}

/// Truncate on a char boundary, marking the cut with `...`.
pub fn snippet(html: &str) -> String {
    let trimmed = html.trim();
    match trimmed.char_indices().nth(SNIPPET_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Direct framework lookup first, then the nearest indexed DOM ancestor.
pub fn resolve_owner<'a>(
    resolution: &TargetResolution,
    index: &'a ComponentIndex,
) -> Option<&'a ComponentDescriptor> {
    if !resolution.found {
        return None;
    }
    resolution
        .direct
        .iter()
        .find_map(|id| index.by_node(*id))
        .or_else(|| {
            resolution
                .ancestors
                .iter()
                .find_map(|handle| index.by_element(*handle))
        })
}

#[derive(Clone, Debug, Default)]
pub struct AttributionStats {
    pub nodes: usize,
    pub attributed: usize,
    pub unresolved_selectors: usize,
}

#[derive(Default)]
pub struct ViolationAttributor;

impl ViolationAttributor {
    pub fn new() -> Self {
        Self
    }

    pub async fn attribute(
        &self,
        raw: &[RawViolation],
        index: &ComponentIndex,
        resolver: &dyn TargetResolver,
    ) -> (Vec<AttributedViolation>, AttributionStats) {
        let mut selectors: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for node in raw.iter().flat_map(|violation| violation.nodes.iter()) {
            if let Some(first) = node.target.first() {
                if !positions.contains_key(first) {
                    positions.insert(first.clone(), selectors.len());
                    selectors.push(first.clone());
                }
            }
        }

        let resolutions = match resolver.resolve(&selectors).await {
            Ok(resolutions) if resolutions.len() == selectors.len() => resolutions,
            Ok(resolutions) => {
                warn!(
                    target: "scan-kernel::attribution",
                    expected = selectors.len(),
                    got = resolutions.len(),
                    "target resolution count mismatch; leaving nodes unattributed"
                );
                Vec::new()
            }
            Err(err) => {
                warn!(
                    target: "scan-kernel::attribution",
                    %err,
                    "target resolution failed; leaving nodes unattributed"
                );
                Vec::new()
            }
        };

        let mut stats = AttributionStats::default();
        let attributed = raw
            .iter()
            .map(|violation| AttributedViolation {
                id: violation.id.clone(),
                impact: violation.impact,
                description: violation.description.clone(),
                help: violation.help.clone(),
                help_url: violation.help_url.clone(),
                tags: violation.tags.clone(),
                nodes: violation
                    .nodes
                    .iter()
                    .map(|node| {
                        let resolution = node
                            .target
                            .first()
                            .and_then(|first| positions.get(first))
                            .and_then(|pos| resolutions.get(*pos));
                        let attributed = attribute_node(&violation.id, node, resolution, index);
                        stats.nodes += 1;
                        if attributed.component.is_some() {
                            stats.attributed += 1;
                        }
                        if resolution.map(|r| !r.found).unwrap_or(false) {
                            stats.unresolved_selectors += 1;
                        }
                        attributed
                    })
                    .collect(),
            })
            .collect();

        debug!(
            target: "scan-kernel::attribution",
            nodes = stats.nodes,
            attributed = stats.attributed,
            unresolved = stats.unresolved_selectors,
            "attribution finished"
        );
        (attributed, stats)
    }
}

fn attribute_node(
    rule: &str,
    node: &RawNode,
    resolution: Option<&TargetResolution>,
    index: &ComponentIndex,
) -> AttributedViolationNode {
    if let Some(TargetResolution {
        error: Some(error),
        selector,
        ..
    }) = resolution
    {
        debug!(target: "scan-kernel::attribution", rule, %selector, %error, "selector failed to resolve");
    }

    let owner = resolution.and_then(|resolution| resolve_owner(resolution, index));
    let component_path = owner.map(|d| d.path.clone()).unwrap_or_default();
    let css_selector = resolution
        .and_then(|r| r.canonical.clone())
        .or_else(|| node.target.first().cloned());

    AttributedViolationNode {
        html: node.html.clone(),
        target: node.target.clone(),
        failure_summary: node.failure_summary.clone(),
        impact: node.impact,
        component: owner.map(|d| d.name.clone()),
        user_component_path: user_path(&component_path),
        component_path,
        css_selector,
        snippet: snippet(&node.html),
        is_framework_component: owner.map(|d| is_framework_name(&d.name)).unwrap_or(false),
    }
}
