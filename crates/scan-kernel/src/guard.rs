//! Scoped suppression of the page's history API while the rule engine runs.

use std::sync::Arc;

use cdp_adapter::{AdapterError, Cdp, PageId};
use tracing::{debug, warn};

use crate::scripts;

/// Holds `pushState`/`replaceState`/`go`/`back`/`forward` as no-ops until restored.
pub struct HistoryGuard {
    cdp: Arc<dyn Cdp>,
    page: PageId,
    armed: bool,
}

impl HistoryGuard {
    pub async fn install(cdp: Arc<dyn Cdp>, page: PageId) -> Result<Self, AdapterError> {
        cdp.evaluate_script(page, scripts::HISTORY_GUARD).await?;
        debug!(target: "scan-kernel::guard", ?page, "history api suppressed");
        Ok(Self {
            cdp,
            page,
            armed: true,
        })
    }

    pub async fn restore(mut self) -> Result<(), AdapterError> {
        self.armed = false;
        self.cdp
            .evaluate_script(self.page, scripts::HISTORY_RESTORE)
            .await
            .map(|_| ())
    }
}

impl Drop for HistoryGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let cdp = Arc::clone(&self.cdp);
        let page = self.page;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = cdp.evaluate_script(page, scripts::HISTORY_RESTORE).await {
                        warn!(target: "scan-kernel::guard", %err, "deferred history restore failed");
                    }
                });
            }
            Err(_) => {
                debug!(target: "scan-kernel::guard", "no runtime to restore history api");
            }
        }
    }
}
