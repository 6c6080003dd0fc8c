//! One scan session: acquire, navigate, stabilize, detect, scan, attribute, aggregate, release.

use std::sync::Arc;

use a11yscope_core_types::{
    AttributedViolation, ComponentDescriptor, CustomViolation, RawViolation, ScanId, ScanSummary,
};
use cdp_adapter::{AdapterMetricsSnapshot, BrowserProvider, EngineKind, ScopedBrowser};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::aggregate::aggregate;
use crate::attribution::{PageTargetResolver, ViolationAttributor};
use crate::checks::{run_checks, CustomCheck};
use crate::component_tree::{ComponentTreeWalker, WalkOptions};
use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::executor::{ScanExecutor, ScanRequest};
use crate::framework::{FrameworkDetector, FrameworkInfo, RootStrategy};
use crate::injector::{BundleInjector, BundleSource};
use crate::stability::{StabilityMonitor, StabilityReport};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    pub url: String,
    pub engine: EngineKind,
    pub headless: bool,
    /// Criterion-tag filter such as `wcag2a`; empty runs every rule.
    pub tags: Vec<String>,
    pub include_keyboard_tests: bool,
}

impl ScanOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            engine: EngineKind::default(),
            headless: true,
            tags: Vec::new(),
            include_keyboard_tests: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalStats {
    pub visited: usize,
    pub truncated: bool,
    pub root_strategy: RootStrategy,
    pub attributed_nodes: usize,
    pub unresolved_selectors: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scan_id: ScanId,
    pub url: String,
    pub final_url: Option<String>,
    pub engine: EngineKind,
    pub framework: FrameworkInfo,
    pub stability: StabilityReport,
    pub summary: ScanSummary,
    pub violations: Vec<AttributedViolation>,
    pub passes: Vec<RawViolation>,
    pub incomplete: Vec<RawViolation>,
    pub inapplicable_count: usize,
    pub custom_violations: Vec<CustomViolation>,
    pub components: Vec<ComponentDescriptor>,
    pub traversal: TraversalStats,
    pub attempts: u32,
    pub warnings: Vec<String>,
    /// DevTools traffic of the session, when the browser reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<AdapterMetricsSnapshot>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(Box<ScanResult>),
    /// The caller cancelled; the browser was still released.
    Cancelled,
}

impl ScanOutcome {
    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            ScanOutcome::Completed(result) => Some(*result),
            ScanOutcome::Cancelled => None,
        }
    }
}

/// Releases the browser when dropped unless [`ReleaseGuard::release`] already ran. Covers a scan
/// future that is dropped mid-flight, e.g. by an outer timeout or an aborted task.
struct ReleaseGuard {
    browser: Arc<dyn ScopedBrowser>,
    armed: bool,
}

impl ReleaseGuard {
    fn new(browser: Box<dyn ScopedBrowser>) -> Self {
        Self {
            browser: Arc::from(browser),
            armed: true,
        }
    }

    async fn release(mut self) {
        if let Err(err) = self.browser.release().await {
            warn!(target: "scan-kernel::orchestrator", %err, "browser release failed");
        }
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let browser = Arc::clone(&self.browser);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(target: "scan-kernel::orchestrator", "scan dropped before completion; releasing browser");
                handle.spawn(async move {
                    if let Err(err) = browser.release().await {
                        warn!(target: "scan-kernel::orchestrator", %err, "browser release failed");
                    }
                });
            }
            Err(_) => {
                warn!(target: "scan-kernel::orchestrator", "no runtime left to release the browser");
            }
        }
    }
}

pub struct ScanOrchestrator {
    config: ScanConfig,
    provider: Arc<dyn BrowserProvider>,
    bundle: BundleSource,
    checks: Vec<Arc<dyn CustomCheck>>,
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig, provider: Arc<dyn BrowserProvider>) -> Self {
        let bundle = BundleSource::File(config.bundle.path.clone());
        Self {
            config,
            provider,
            bundle,
            checks: Vec::new(),
        }
    }

    pub fn with_bundle(mut self, bundle: BundleSource) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn with_checks(mut self, checks: Vec<Arc<dyn CustomCheck>>) -> Self {
        self.checks = checks;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one session. The browser is released on every path once acquired, including
    /// cancellation, which yields [`ScanOutcome::Cancelled`] rather than an error, and a
    /// dropped future, which releases in the background.
    #[instrument(name = "a11yscope.scan", skip_all, fields(url = %options.url, engine = %options.engine))]
    pub async fn perform_scan(
        &self,
        options: &ScanOptions,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        self.config.validate()?;
        let started_at = Utc::now();
        let clock = Instant::now();

        let browser = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(target: "scan-kernel::orchestrator", "cancelled before a browser was acquired");
                return Ok(ScanOutcome::Cancelled);
            }
            acquired = self.provider.acquire(options.engine, options.headless) => acquired?,
        };
        let guard = ReleaseGuard::new(browser);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run_session(guard.browser.as_ref(), options, started_at) => Some(result),
        };
        let protocol = guard.browser.metrics();
        guard.release().await;

        match outcome {
            None => {
                info!(target: "scan-kernel::orchestrator", "scan cancelled");
                Ok(ScanOutcome::Cancelled)
            }
            Some(Ok(mut result)) => {
                result.protocol = protocol;
                result.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    target: "scan-kernel::orchestrator",
                    scan_id = %result.scan_id,
                    violations = result.summary.total_violations,
                    components = result.summary.total_components,
                    duration_ms = result.duration_ms,
                    "scan completed"
                );
                Ok(ScanOutcome::Completed(Box::new(result)))
            }
            Some(Err(err)) => {
                warn!(target: "scan-kernel::orchestrator", %err, "scan failed");
                Err(err)
            }
        }
    }

    async fn run_session(
        &self,
        browser: &dyn ScopedBrowser,
        options: &ScanOptions,
        started_at: DateTime<Utc>,
    ) -> Result<ScanResult, ScanError> {
        let cfg = &self.config;
        let cdp = browser.cdp();
        let page = browser.page();
        let mut warnings = Vec::new();

        let before = cdp.navigation_epoch(page);
        cdp.navigate(page, &options.url, cfg.browser.navigation_timeout())
            .await
            .map_err(|err| {
                ScanError::from_navigation(&options.url, cfg.browser.navigation_timeout_ms, err)
            })?;
        // the committed document is the baseline; later epochs are client-side redirects
        let baseline = if cdp.navigation_epoch(page) > before {
            before + 1
        } else {
            before
        };

        let stability = StabilityMonitor::new(Arc::clone(&cdp), cfg.stability.clone())
            .wait_until_stable(page, baseline)
            .await;
        if !stability.is_stable {
            warnings.push(format!(
                "page did not settle after {} navigations",
                stability.navigation_count
            ));
        }

        let framework = FrameworkDetector::new(Arc::clone(&cdp), cfg.traversal.sample_limit)
            .detect(page)
            .await;

        let injector = Arc::new(BundleInjector::new(
            Arc::clone(&cdp),
            self.bundle.clone(),
            cfg.bundle.marker.clone(),
        ));
        let executor = ScanExecutor::new(Arc::clone(&cdp), injector, cfg.retry.policy());
        let request = ScanRequest {
            tags: options.tags.clone(),
            max_nodes: cfg.traversal.max_nodes,
            sample_limit: cfg.traversal.sample_limit,
        };
        let data = executor
            .scan(page, &request, |attempt, err| {
                warnings.push(format!("scan attempt {attempt} failed: {err}"));
            })
            .await?;
        warnings.extend(data.warnings.iter().cloned());

        let traversal = ComponentTreeWalker::new(WalkOptions {
            max_nodes: cfg.traversal.max_nodes,
            include_host_elements: cfg.traversal.include_host_elements,
        })
        .traverse(&data.graph, None);
        if traversal.truncated || data.truncated {
            warnings.push("component traversal stopped at the node cap".to_string());
        }

        let resolver = PageTargetResolver::new(Arc::clone(&cdp), page);
        let (violations, stats) = ViolationAttributor::new()
            .attribute(&data.violations, &traversal.index, &resolver)
            .await;

        let (custom_violations, check_warnings) = run_checks(
            &self.checks,
            cdp.as_ref(),
            page,
            options.include_keyboard_tests,
            &options.tags,
        )
        .await;
        warnings.extend(check_warnings);

        let components = traversal.index.into_descriptors();
        let summary = aggregate(
            &components,
            &violations,
            &custom_violations,
            Some(data.passes.as_slice()),
            Some(data.incomplete.as_slice()),
        );

        Ok(ScanResult {
            scan_id: ScanId::new(),
            url: options.url.clone(),
            final_url: cdp.current_url(page).or_else(|| stability.final_url.clone()),
            engine: browser.engine(),
            framework,
            stability,
            summary,
            violations,
            passes: data.passes,
            incomplete: data.incomplete,
            inapplicable_count: data.inapplicable.len(),
            custom_violations,
            components,
            traversal: TraversalStats {
                visited: traversal.visited,
                truncated: traversal.truncated || data.truncated,
                root_strategy: data.root_strategy,
                attributed_nodes: stats.attributed,
                unresolved_selectors: stats.unresolved_selectors,
            },
            attempts: data.attempts,
            warnings,
            protocol: None,
            started_at,
            duration_ms: 0,
        })
    }
}
