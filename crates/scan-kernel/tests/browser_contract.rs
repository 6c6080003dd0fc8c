//! Full scan against a real Chromium. Ignored by default: needs an engine on the host and a
//! rule-engine bundle at `A11YSCOPE_BUNDLE`.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use a11yscope_kernel::{BundleSource, ScanConfig, ScanOptions, ScanOrchestrator};
use cdp_adapter::CdpBrowserProvider;
use tokio_util::sync::CancellationToken;

fn contract_enabled() -> bool {
    env::var("A11YSCOPE_BROWSER_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium and A11YSCOPE_BUNDLE; set A11YSCOPE_BROWSER_CONTRACT=1"]
async fn scans_static_fixture() {
    if !contract_enabled() {
        eprintln!("skipping browser contract test (A11YSCOPE_BROWSER_CONTRACT not enabled)");
        return;
    }
    let Ok(bundle) = env::var("A11YSCOPE_BUNDLE") else {
        eprintln!("skipping browser contract test (A11YSCOPE_BUNDLE not set)");
        return;
    };

    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/basic.html");
    let url = format!("file://{}", fixture.display());

    let config = ScanConfig::default();
    let provider = Arc::new(CdpBrowserProvider::new(config.browser.cdp_config()));
    let orchestrator = ScanOrchestrator::new(config, provider)
        .with_bundle(BundleSource::File(PathBuf::from(bundle)));

    let result = orchestrator
        .perform_scan(&ScanOptions::new(url), CancellationToken::new())
        .await
        .expect("scan")
        .into_result()
        .expect("not cancelled");

    let ids: Vec<&str> = result.violations.iter().map(|v| v.id.as_str()).collect();
    assert!(ids.contains(&"image-alt"), "violations: {ids:?}");
    assert!(result.stability.is_stable);
    // plain HTML: nothing to attribute
    assert!(result.components.is_empty());
}
