//! Contract tests that drive a real engine through [`BrowserResource`]. Ignored by default
//! because they need Chrome/Chromium installed on the host.

use std::env;
use std::time::Duration;

use cdp_adapter::{BrowserResource, CdpConfig, EngineKind, ScopedBrowser, WaitGate};

fn contract_enabled() -> bool {
    env::var("A11YSCOPE_BROWSER_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn data_url(html: &str) -> String {
    format!("data:text/html,{}", html.replace('#', "%23"))
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set A11YSCOPE_BROWSER_CONTRACT=1"]
async fn contract_navigate_and_evaluate() {
    if !contract_enabled() {
        eprintln!("skipping browser contract test (A11YSCOPE_BROWSER_CONTRACT not enabled)");
        return;
    }

    let cfg = CdpConfig {
        engine: EngineKind::Chromium,
        ..CdpConfig::default()
    };
    let browser = BrowserResource::acquire(cfg).await.expect("acquire chromium");
    let cdp = browser.cdp();
    let page = browser.page();

    let before = cdp.navigation_epoch(page);
    cdp.navigate(
        page,
        &data_url("<title>contract</title><main>hello</main>"),
        Duration::from_secs(15),
    )
    .await
    .expect("navigate succeeds");
    assert!(cdp.navigation_epoch(page) > before);

    cdp.wait_basic(page, WaitGate::network_idle(200), Duration::from_secs(5))
        .await
        .expect("network settles");

    let title = cdp
        .evaluate_script(page, "Promise.resolve(document.title)")
        .await
        .expect("evaluate");
    assert_eq!(title, "contract");

    browser.release().await.expect("release");
    browser.release().await.expect("second release is a no-op");
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set A11YSCOPE_BROWSER_CONTRACT=1"]
async fn contract_counts_history_navigations() {
    if !contract_enabled() {
        eprintln!("skipping browser contract test (A11YSCOPE_BROWSER_CONTRACT not enabled)");
        return;
    }

    let browser = BrowserResource::acquire(CdpConfig::default())
        .await
        .expect("acquire chromium");
    let cdp = browser.cdp();
    let page = browser.page();

    cdp.navigate(page, &data_url("<p>spa</p>"), Duration::from_secs(15))
        .await
        .expect("navigate");
    let epoch = cdp.navigation_epoch(page);

    cdp.evaluate_script(page, "location.hash = '/next'; true")
        .await
        .expect("hash change");
    let mark = cdp
        .wait_for_navigation(page, epoch, Duration::from_secs(5))
        .await
        .expect("wait")
        .expect("history navigation observed");
    assert_eq!(mark.epoch, epoch + 1);

    browser.release().await.expect("release");
}
