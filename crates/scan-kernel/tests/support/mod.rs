//! In-memory page and browser fakes for driving the orchestrator without an engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterMetricsSnapshot, AdapterErrorKind, BrowserProvider, Cdp, EngineKind, LaunchError, NavigationMark,
    PageId, ScopedBrowser, WaitGate,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const BUNDLE: &str = "/* fake-rule-engine */ window.__A11YSCOPE__ = { run: () => ({}) };";

#[derive(Default)]
pub struct PageState {
    pub epoch: u64,
    pub url: Option<String>,
    pub marker_present: bool,
    pub bundle_loads: usize,
    pub scan_calls: usize,
    pub history_guarded: bool,
    pub scanned_while_unguarded: bool,
    pub restores: usize,
}

pub struct FakePage {
    pub state: Mutex<PageState>,
    /// URLs the app pushes right after the first load.
    pub redirects: Vec<String>,
    /// Remaining scan evaluations that throw; `usize::MAX` always throws.
    pub scan_failures: Mutex<usize>,
    pub bundle_defines_marker: bool,
    pub navigation_error: Option<AdapterErrorKind>,
    pub payload: Value,
    pub resolutions: HashMap<String, Value>,
    pub checks: Value,
    pub scan_failed: Arc<Notify>,
}

impl FakePage {
    pub fn new(payload: Value) -> Self {
        Self {
            state: Mutex::new(PageState::default()),
            redirects: Vec::new(),
            scan_failures: Mutex::new(0),
            bundle_defines_marker: true,
            navigation_error: None,
            payload,
            resolutions: HashMap::new(),
            checks: json!([]),
            scan_failed: Arc::new(Notify::new()),
        }
    }

    pub fn with_resolution(mut self, selector: &str, resolution: Value) -> Self {
        self.resolutions.insert(selector.to_string(), resolution);
        self
    }

    pub fn scan_calls(&self) -> usize {
        self.state.lock().unwrap().scan_calls
    }

    pub fn bundle_loads(&self) -> usize {
        self.state.lock().unwrap().bundle_loads
    }

    fn resolve(&self, expression: &str) -> Value {
        let args = expression
            .rfind("({\"selectors\"")
            .map(|start| &expression[start + 1..expression.len() - 1])
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .unwrap_or(Value::Null);
        let selectors = args
            .get("selectors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Value::Array(
            selectors
                .iter()
                .map(|selector| {
                    let key = selector.as_str().unwrap_or_default();
                    self.resolutions.get(key).cloned().unwrap_or_else(|| {
                        json!({ "found": false, "selector": key, "direct": [], "ancestors": [] })
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Cdp for FakePage {
    async fn navigate(&self, _: PageId, url: &str, _: Duration) -> Result<(), AdapterError> {
        if let Some(kind) = &self.navigation_error {
            return Err(AdapterError::new(kind.clone()).with_hint("net::ERR_NAME_NOT_RESOLVED"));
        }
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
        state.url = Some(url.to_string());
        state.marker_present = false;
        for redirect in &self.redirects {
            state.epoch += 1;
            state.url = Some(redirect.clone());
        }
        Ok(())
    }

    async fn evaluate_script(&self, _: PageId, expr: &str) -> Result<Value, AdapterError> {
        if expr.contains("a11yscope:history-guard") {
            self.state.lock().unwrap().history_guarded = true;
            return Ok(Value::Bool(true));
        }
        if expr.contains("a11yscope:history-restore") {
            let mut state = self.state.lock().unwrap();
            state.history_guarded = false;
            state.restores += 1;
            return Ok(Value::Bool(true));
        }
        if expr.starts_with("typeof (window[") {
            return Ok(Value::Bool(self.state.lock().unwrap().marker_present));
        }
        if expr.contains("a11yscope:detect-framework") {
            return Ok(json!({
                "kind": "react",
                "version": "18.2.0",
                "rootStrategy": "container",
                "container": "root"
            }));
        }
        if expr.contains("a11yscope:scan") {
            {
                let mut state = self.state.lock().unwrap();
                state.scan_calls += 1;
                if !state.history_guarded {
                    state.scanned_while_unguarded = true;
                }
            }
            let fail = {
                let mut remaining = self.scan_failures.lock().unwrap();
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    true
                } else {
                    false
                }
            };
            if fail {
                self.scan_failed.notify_one();
                return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                    .with_hint("Execution context was destroyed"));
            }
            return Ok(self.payload.clone());
        }
        if expr.contains("a11yscope:resolve-targets") {
            return Ok(self.resolve(expr));
        }
        if expr.contains("a11yscope:check:") {
            return Ok(self.checks.clone());
        }
        if expr.contains("fake-rule-engine") {
            let mut state = self.state.lock().unwrap();
            state.bundle_loads += 1;
            if self.bundle_defines_marker {
                state.marker_present = true;
            }
            return Ok(Value::Null);
        }
        Ok(Value::Null)
    }

    async fn wait_basic(&self, _: PageId, _: WaitGate, _: Duration) -> Result<(), AdapterError> {
        Ok(())
    }

    fn navigation_epoch(&self, _: PageId) -> u64 {
        self.state.lock().unwrap().epoch
    }

    async fn wait_for_navigation(
        &self,
        _: PageId,
        after_epoch: u64,
        timeout: Duration,
    ) -> Result<Option<NavigationMark>, AdapterError> {
        let mark = |state: &PageState| {
            (state.epoch > after_epoch).then(|| NavigationMark {
                epoch: state.epoch,
                url: state.url.clone(),
            })
        };
        let current = mark(&self.state.lock().unwrap());
        if current.is_some() {
            return Ok(current);
        }
        tokio::time::sleep(timeout).await;
        Ok(mark(&self.state.lock().unwrap()))
    }

    fn current_url(&self, _: PageId) -> Option<String> {
        self.state.lock().unwrap().url.clone()
    }
}

pub struct FakeBrowser {
    page_id: PageId,
    page: Arc<FakePage>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl ScopedBrowser for FakeBrowser {
    fn engine(&self) -> EngineKind {
        EngineKind::Chromium
    }

    fn page(&self) -> PageId {
        self.page_id
    }

    fn cdp(&self) -> Arc<dyn Cdp> {
        self.page.clone()
    }

    async fn release(&self) -> Result<(), AdapterError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn metrics(&self) -> Option<AdapterMetricsSnapshot> {
        Some(AdapterMetricsSnapshot {
            commands: self.page.scan_calls() as u64,
            ..Default::default()
        })
    }
}

pub struct FakeProvider {
    pub page: Arc<FakePage>,
    pub releases: Arc<AtomicUsize>,
    pub acquisitions: AtomicUsize,
    pub launch_failure: Option<String>,
}

impl FakeProvider {
    pub fn new(page: FakePage) -> Arc<Self> {
        Arc::new(Self {
            page: Arc::new(page),
            releases: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
            launch_failure: None,
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            page: Arc::new(FakePage::new(Value::Null)),
            releases: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
            launch_failure: Some(reason.to_string()),
        })
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserProvider for FakeProvider {
    async fn acquire(
        &self,
        engine: EngineKind,
        _headless: bool,
    ) -> Result<Box<dyn ScopedBrowser>, LaunchError> {
        if let Some(reason) = &self.launch_failure {
            return Err(LaunchError::classify(engine, reason.clone()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            page_id: PageId::new(),
            page: Arc::clone(&self.page),
            releases: Arc::clone(&self.releases),
        }))
    }
}

/// Two findings on a small React form: an `<img>` without `alt` and an unlabeled `<input>`.
pub fn fixture_payload() -> Value {
    json!({
        "violations": [
            {
                "id": "image-alt",
                "impact": "critical",
                "description": "Ensures <img> elements have alternate text",
                "help": "Images must have alternate text",
                "helpUrl": "https://dequeuniversity.com/rules/axe/4.8/image-alt",
                "tags": ["cat.text-alternatives", "wcag2a", "wcag111"],
                "nodes": [{ "html": "<img src=\"logo.png\">", "target": ["img"],
                            "failureSummary": "Element does not have an alt attribute" }]
            },
            {
                "id": "label",
                "impact": "critical",
                "description": "Ensures every form element has a label",
                "help": "Form elements must have labels",
                "helpUrl": "https://dequeuniversity.com/rules/axe/4.8/label",
                "tags": ["cat.forms", "wcag2a", "wcag412", "wcag131"],
                "nodes": [{ "html": "<input id=\"email\" type=\"text\">", "target": ["#email"] }]
            }
        ],
        "passes": [{ "id": "document-title", "tags": ["wcag2a"], "nodes": [] }],
        "incomplete": [],
        "inapplicable": [{ "id": "video-caption" }],
        "components": [
            { "id": 1, "name": "", "kind": "composite-component", "children": [2] },
            { "id": 2, "name": "App", "kind": "composite-component", "children": [3] },
            { "id": 3, "name": "Suspense", "kind": "composite-component", "children": [4] },
            { "id": 4, "name": "SignupForm", "kind": "composite-component", "children": [5] },
            { "id": 5, "name": "form", "kind": "host-element", "children": [6, 7], "element": 50 },
            { "id": 6, "name": "img", "kind": "host-element", "children": [], "element": 60 },
            { "id": 7, "name": "input", "kind": "host-element", "children": [], "element": 70 }
        ],
        "componentRoot": 1,
        "rootStrategy": "container",
        "truncated": false
    })
}

pub fn fixture_page() -> FakePage {
    FakePage::new(fixture_payload())
        .with_resolution(
            "img",
            json!({ "found": true, "selector": "img", "canonical": "#root > form > img",
                    "direct": [4], "ancestors": [60, 50] }),
        )
        .with_resolution(
            "#email",
            json!({ "found": true, "selector": "#email", "canonical": "#email",
                    "direct": [], "ancestors": [70, 50] }),
        )
}
