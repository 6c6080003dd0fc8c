//! Post-navigation settling for pages that keep redirecting on the client.

use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{Cdp, PageId, WaitGate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StabilitySettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityState {
    Probing,
    Stable,
    Exhausted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityReport {
    pub state: StabilityState,
    pub navigation_count: u32,
    pub is_stable: bool,
    pub final_url: Option<String>,
    pub last_error: Option<String>,
}

pub struct StabilityMonitor {
    cdp: Arc<dyn Cdp>,
    settings: StabilitySettings,
}

impl StabilityMonitor {
    pub fn new(cdp: Arc<dyn Cdp>, settings: StabilitySettings) -> Self {
        Self { cdp, settings }
    }

    /// Probe until no further main-frame navigation shows up. `baseline_epoch` is the epoch of
    /// the document the caller navigated to; anything after it counts as a redirect.
    pub async fn wait_until_stable(&self, page: PageId, baseline_epoch: u64) -> StabilityReport {
        let idle_timeout = Duration::from_millis(self.settings.network_idle_timeout_ms);
        let settle = Duration::from_millis(self.settings.settle_delay_ms);
        let probe = Duration::from_millis(self.settings.navigation_probe_ms);

        let mut seen = baseline_epoch;
        let mut navigation_count: u32 = 0;
        let mut last_error: Option<String> = None;
        let mut state = StabilityState::Probing;

        while state == StabilityState::Probing {
            let gate = WaitGate::network_idle(self.settings.network_quiet_window_ms);
            if let Err(err) = self.cdp.wait_basic(page, gate, idle_timeout).await {
                debug!(target: "scan-kernel::stability", %err, "network still busy; continuing");
                last_error = Some(err.to_string());
            }

            tokio::time::sleep(settle).await;

            match self.cdp.wait_for_navigation(page, seen, probe).await {
                Ok(None) => state = StabilityState::Stable,
                Ok(Some(mark)) => {
                    let delta = mark.epoch.saturating_sub(seen).max(1);
                    navigation_count =
                        navigation_count.saturating_add(u32::try_from(delta).unwrap_or(u32::MAX));
                    seen = mark.epoch;
                    debug!(
                        target: "scan-kernel::stability",
                        navigation_count,
                        url = mark.url.as_deref().unwrap_or(""),
                        "client-side navigation observed"
                    );
                    if navigation_count >= self.settings.max_navigations {
                        state = StabilityState::Exhausted;
                    }
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    state = StabilityState::Exhausted;
                }
            }
        }

        if state == StabilityState::Exhausted {
            warn!(
                target: "scan-kernel::stability",
                navigation_count,
                last_error = last_error.as_deref().unwrap_or("none"),
                "page never settled; scanning current document anyway"
            );
        } else {
            info!(target: "scan-kernel::stability", navigation_count, "page stable");
        }

        StabilityReport {
            is_stable: state == StabilityState::Stable,
            state,
            navigation_count,
            final_url: self.cdp.current_url(page),
            last_error,
        }
    }
}
