use std::path::{Path, PathBuf};
use std::sync::Arc;

use a11yscope_core_types::Impact;
use a11yscope_kernel::{
    builtin_checks, CustomCheck, ScanConfig, ScanOptions, ScanOrchestrator, ScanOutcome,
    ScriptCheck,
};
use anyhow::{Context, Result};
use cdp_adapter::{CdpBrowserProvider, EngineKind};
use clap::Args;
use tokio::fs;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::context::CliContext;
use super::output::{render, threshold_status, ExitStatus, ReportFormat};

#[derive(Args, Clone, Debug)]
pub struct ScanArgs {
    /// Page to scan
    pub url: String,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long, value_name = "ENGINE")]
    pub engine: Option<EngineKind>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Attach to an already running DevTools endpoint instead of launching
    #[arg(long, value_name = "WS_URL")]
    pub ws_url: Option<String>,

    /// Only run rules carrying these tags, e.g. wcag2a,wcag2aa
    #[arg(long, value_delimiter = ',', value_name = "TAGS")]
    pub tags: Vec<String>,

    /// Include checks that drive the keyboard
    #[arg(long)]
    pub keyboard: bool,

    /// Rule-engine bundle to inject
    #[arg(long, value_name = "FILE")]
    pub bundle: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value = "summary")]
    pub format: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Exit with status 1 when a violation at or above this impact is found
    #[arg(long, value_name = "IMPACT")]
    pub fail_on: Option<Impact>,

    /// Navigation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl ScanArgs {
    /// Command-line flags are the last configuration layer.
    pub fn apply_to(&self, config: &mut ScanConfig) {
        if let Some(engine) = self.engine {
            config.browser.engine = engine;
        }
        if self.headed {
            config.browser.headless = false;
        }
        if let Some(url) = &self.ws_url {
            config.browser.websocket_url = Some(url.clone());
        }
        if let Some(path) = &self.bundle {
            config.bundle.path = path.clone();
        }
        if let Some(secs) = self.timeout {
            config.browser.navigation_timeout_ms = secs.saturating_mul(1_000);
        }
    }

    pub fn options(&self, config: &ScanConfig) -> ScanOptions {
        ScanOptions {
            url: self.url.clone(),
            engine: config.browser.engine,
            headless: config.browser.headless,
            tags: self.tags.clone(),
            include_keyboard_tests: self.keyboard,
        }
    }
}

pub async fn cmd_scan(args: ScanArgs, ctx: &CliContext) -> Result<ExitStatus> {
    let mut config = ctx.config().clone();
    args.apply_to(&mut config);
    let options = args.options(&config);

    let mut checks = builtin_checks();
    for check in &config.checks {
        let loaded = ScriptCheck::load(check)
            .await
            .with_context(|| format!("Failed to load check `{}`", check.id))?;
        checks.push(Arc::new(loaded) as Arc<dyn CustomCheck>);
    }

    let provider = Arc::new(CdpBrowserProvider::new(config.browser.cdp_config()));
    let orchestrator = ScanOrchestrator::new(config, provider).with_checks(checks);

    let cancel = CancellationToken::new();
    let watcher = watch_interrupt(cancel.clone());
    let outcome = orchestrator.perform_scan(&options, cancel).await;
    watcher.abort();

    match outcome {
        Ok(ScanOutcome::Completed(result)) => {
            let report = render(&result, args.format)?;
            emit(&report, args.output.as_deref()).await?;
            let status = threshold_status(&result.summary, args.fail_on);
            if status == ExitStatus::ThresholdMet {
                warn!(
                    threshold = ?args.fail_on,
                    violations = result.summary.total_violations,
                    "failure threshold met"
                );
            }
            Ok(status)
        }
        Ok(ScanOutcome::Cancelled) => {
            eprintln!("Scan cancelled");
            Ok(ExitStatus::Cancelled)
        }
        Err(err) => {
            error!(%err, "scan failed");
            eprintln!("Error: {err}");
            if let Some(hint) = err.remediation() {
                eprintln!("Hint: {hint}");
            }
            Ok(ExitStatus::Fatal)
        }
    }
}

/// First Ctrl-C cancels the session; the orchestrator still releases the browser.
fn watch_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling scan");
            cancel.cancel();
        }
    })
}

async fn emit(report: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, report)
                .await
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{report}"),
    }
    Ok(())
}
