//! Scan orchestration and component attribution for a11yscope.
//!
//! [`ScanOrchestrator::perform_scan`] drives one session against a browser obtained from a
//! [`cdp_adapter::BrowserProvider`]: navigation, [`StabilityMonitor`], [`FrameworkDetector`],
//! [`BundleInjector`] + [`ScanExecutor`] under a [`RetryPolicy`], [`ComponentTreeWalker`],
//! [`ViolationAttributor`] and finally [`aggregate`]. Every component takes its slice of
//! [`ScanConfig`] at construction; nothing reads process-wide state.

pub mod aggregate;
pub mod attribution;
pub mod checks;
pub mod component_tree;
pub mod config;
pub mod errors;
pub mod executor;
pub mod framework;
pub mod guard;
pub mod injector;
pub mod orchestrator;
pub mod retry;
mod scripts;
pub mod stability;

pub use aggregate::{aggregate, criterion_from_tag, level_from_tags, top_criteria};
pub use attribution::{
    is_framework_name, resolve_owner, user_path, PageTargetResolver, TargetResolution,
    TargetResolver, ViolationAttributor,
};
pub use checks::{builtin_checks, run_checks, selected_by_tags, CustomCheck, ScriptCheck};
pub use component_tree::{
    ComponentGraph, ComponentIndex, ComponentTreeWalker, RawComponentGraph, RawGraphNode,
    Traversal, WalkOptions,
};
pub use config::{
    BrowserSettings, BundleSettings, CheckConfig, LoggingSettings, RetrySettings, ScanConfig,
    StabilitySettings, TraversalSettings,
};
pub use errors::ScanError;
pub use executor::{normalize, RawScanData, ScanExecutor, ScanRequest};
pub use framework::{FrameworkDetector, FrameworkInfo, FrameworkKind, RootStrategy};
pub use guard::HistoryGuard;
pub use injector::{BundleInjector, BundleSource};
pub use orchestrator::{ScanOptions, ScanOrchestrator, ScanOutcome, ScanResult, TraversalStats};
pub use retry::{retry, Backoff, RetryExhausted, RetryPolicy};
pub use stability::{StabilityMonitor, StabilityReport, StabilityState};
