//! Idempotent injection of the measurement bundle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cdp_adapter::{Cdp, PageId};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::ScanError;
use crate::scripts;

#[derive(Clone, Debug)]
pub enum BundleSource {
    File(PathBuf),
    Inline(String),
}

pub struct BundleInjector {
    cdp: Arc<dyn Cdp>,
    source: BundleSource,
    marker: String,
    cache: OnceCell<Arc<str>>,
    loads: AtomicU32,
}

impl BundleInjector {
    pub fn new(cdp: Arc<dyn Cdp>, source: BundleSource, marker: impl Into<String>) -> Self {
        Self {
            cdp,
            source,
            marker: marker.into(),
            cache: OnceCell::new(),
            loads: AtomicU32::new(0),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// How many times the bundle has actually been evaluated in a page.
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn is_injected(&self, page: PageId) -> Result<bool, ScanError> {
        let value = self
            .cdp
            .evaluate_script(page, &scripts::marker_probe(&self.marker))
            .await
            .map_err(|err| ScanError::injection(format!("marker probe failed: {err}")))?;
        Ok(value == Value::Bool(true))
    }

    /// No-op when the marker is already present; otherwise load once and verify the marker.
    pub async fn inject(&self, page: PageId) -> Result<(), ScanError> {
        if self.is_injected(page).await? {
            debug!(target: "scan-kernel::injector", marker = %self.marker, "bundle already present");
            return Ok(());
        }

        let bundle = self.bundle_text().await?;
        let expression = format!("{bundle}\n;void 0;");
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.cdp
            .evaluate_script(page, &expression)
            .await
            .map_err(|err| ScanError::injection(format!("bundle evaluation failed: {err}")))?;

        if !self.is_injected(page).await? {
            return Err(ScanError::injection(format!(
                "bundle evaluated but window.{} is missing",
                self.marker
            )));
        }
        info!(target: "scan-kernel::injector", marker = %self.marker, "bundle injected");
        Ok(())
    }

    async fn bundle_text(&self) -> Result<Arc<str>, ScanError> {
        self.cache
            .get_or_try_init(|| async {
                match &self.source {
                    BundleSource::Inline(text) => Ok(Arc::<str>::from(text.as_str())),
                    BundleSource::File(path) => tokio::fs::read_to_string(path)
                        .await
                        .map(Arc::<str>::from)
                        .map_err(|err| {
                            ScanError::injection(format!(
                                "cannot read bundle {}: {err}",
                                path.display()
                            ))
                        }),
                }
            })
            .await
            .cloned()
    }
}
