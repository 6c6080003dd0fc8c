//! Scoped ownership of one engine process and the page a scan runs in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::{Cdp, CdpAdapter};
use crate::config::CdpConfig;
use crate::engine::{BrowserProcess, EngineKind, LaunchError, LaunchErrorKind, LaunchedBrowser};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::PageId;
use crate::metrics::AdapterMetricsSnapshot;

/// A browser plus the page opened in it, released exactly once.
#[async_trait]
pub trait ScopedBrowser: Send + Sync {
    fn engine(&self) -> EngineKind;
    fn page(&self) -> PageId;
    fn cdp(&self) -> Arc<dyn Cdp>;
    /// DevTools traffic so far, for browsers that account for it.
    fn metrics(&self) -> Option<AdapterMetricsSnapshot> {
        None
    }
    /// Close the page and stop the engine. Later calls are no-ops.
    async fn release(&self) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn acquire(
        &self,
        engine: EngineKind,
        headless: bool,
    ) -> Result<Box<dyn ScopedBrowser>, LaunchError>;
}

/// Provider that launches real engines from a base [`CdpConfig`].
#[derive(Clone, Debug, Default)]
pub struct CdpBrowserProvider {
    base: CdpConfig,
}

impl CdpBrowserProvider {
    pub fn new(base: CdpConfig) -> Self {
        Self { base }
    }
}

#[async_trait]
impl BrowserProvider for CdpBrowserProvider {
    async fn acquire(
        &self,
        engine: EngineKind,
        headless: bool,
    ) -> Result<Box<dyn ScopedBrowser>, LaunchError> {
        let mut cfg = self.base.clone();
        cfg.engine = engine;
        cfg.headless = headless;
        let resource = BrowserResource::acquire(cfg).await?;
        Ok(Box::new(resource))
    }
}

pub struct BrowserResource {
    engine: EngineKind,
    page: PageId,
    adapter: Arc<CdpAdapter>,
    process: Mutex<Option<BrowserProcess>>,
    released: AtomicBool,
}

impl BrowserResource {
    /// Launch (or attach to) the configured engine and open a blank page.
    pub async fn acquire(cfg: CdpConfig) -> Result<Self, LaunchError> {
        let LaunchedBrowser {
            engine,
            ws_url,
            process,
        } = cfg.engine.launcher().launch(&cfg).await?;

        let adapter = match CdpAdapter::connect(&ws_url, cfg).await {
            Ok(adapter) => adapter,
            Err(err) => return Err(Self::abandon(engine, process, None, err).await),
        };
        match adapter.create_page("about:blank").await {
            Ok(page) => {
                info!(target: "cdp-adapter", %engine, ?page, "browser acquired");
                Ok(Self::from_parts(engine, adapter, page, process))
            }
            Err(err) => Err(Self::abandon(engine, process, Some(adapter), err).await),
        }
    }

    /// Tear down a half-built session and describe why it failed.
    async fn abandon(
        engine: EngineKind,
        process: Option<BrowserProcess>,
        adapter: Option<Arc<CdpAdapter>>,
        err: AdapterError,
    ) -> LaunchError {
        if let Some(adapter) = adapter {
            adapter.shutdown().await;
        }
        if let Some(mut child) = process {
            if let Err(kill_err) = child.kill().await {
                warn!(target: "cdp-adapter", %kill_err, "failed to stop engine after setup failure");
            }
        }
        LaunchError::new(
            engine,
            LaunchErrorKind::StartFailed,
            format!("devtools session setup failed: {err}"),
        )
    }

    pub(crate) fn from_parts(
        engine: EngineKind,
        adapter: Arc<CdpAdapter>,
        page: PageId,
        process: Option<BrowserProcess>,
    ) -> Self {
        Self {
            engine,
            page,
            adapter,
            process: Mutex::new(process),
            released: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> Arc<CdpAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScopedBrowser for BrowserResource {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn page(&self) -> PageId {
        self.page
    }

    fn cdp(&self) -> Arc<dyn Cdp> {
        self.adapter.clone()
    }

    fn metrics(&self) -> Option<AdapterMetricsSnapshot> {
        Some(self.adapter.metrics())
    }

    async fn release(&self) -> Result<(), AdapterError> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(target: "cdp-adapter", "release called on an already released browser");
            return Ok(());
        }

        if let Err(err) = self.adapter.close_page(self.page).await {
            debug!(target: "cdp-adapter", ?err, "closing page failed; stopping engine anyway");
        }
        self.adapter.shutdown().await;

        let process = self.process.lock().await.take();
        if let Some(mut child) = process {
            child.kill().await.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("failed to stop {} process: {err}", self.engine))
            })?;
        }
        info!(target: "cdp-adapter", engine = %self.engine, "browser released");
        Ok(())
    }
}

impl Drop for BrowserResource {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        debug!(target: "cdp-adapter", engine = %self.engine, "browser dropped without release");
        self.adapter.close();
        let Some(mut child) = self.process.get_mut().take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = child.kill().await {
                    warn!(target: "cdp-adapter", %err, "failed to kill engine process");
                }
            });
        } else {
            debug!(target: "cdp-adapter", "no tokio runtime available to kill engine process");
        }
    }
}
