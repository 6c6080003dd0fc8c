//! Browser resource layer for a11yscope.
//!
//! Launches (or attaches to) a browser engine that speaks the DevTools protocol, opens a single
//! page, and exposes the narrow [`Cdp`] surface the scan kernel drives: navigation, script
//! evaluation, network/DOM wait gates and main-frame navigation tracking. [`BrowserResource`]
//! owns the process and guarantees a single release.

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the browser instance managed by the adapter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Unique identifier for an adapter-side page session.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("navigation failed")]
        Navigation,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("script raised an exception")]
        ScriptException,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn internal(hint: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::Internal).with_hint(hint)
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod config {
    use crate::engine::EngineKind;
    use serde::{Deserialize, Serialize};
    use std::{env, path::PathBuf};

    /// Configuration for launching and tuning the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub engine: EngineKind,
        /// Explicit engine executable; resolved per engine when unset.
        pub executable: Option<PathBuf>,
        pub user_data_dir: Option<PathBuf>,
        pub headless: bool,
        pub default_deadline_ms: u64,
        pub launch_timeout_ms: u64,
        /// Attach to an already running endpoint instead of spawning a process.
        pub websocket_url: Option<String>,
        pub no_sandbox: bool,
        pub extra_args: Vec<String>,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                engine: EngineKind::default(),
                executable: None,
                user_data_dir: None,
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                launch_timeout_ms: 20_000,
                websocket_url: None,
                no_sandbox: resolve_no_sandbox_default(),
                extra_args: Vec::new(),
            }
        }
    }

    fn resolve_headless_default() -> bool {
        // "0", "false", "no", "off" means headful
        match env::var("A11YSCOPE_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn resolve_no_sandbox_default() -> bool {
        env::var("A11YSCOPE_DISABLE_SANDBOX")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

pub mod adapter;
pub mod commands;
pub mod engine;
pub mod metrics;
pub mod network;
pub mod registry;
pub mod resource;
pub mod transport;
pub mod util;

pub use adapter::{Cdp, CdpAdapter, NavigationMark};
pub use commands::WaitGate;
pub use config::CdpConfig;
pub use engine::{
    BrowserProcess, EngineKind, EngineLauncher, LaunchError, LaunchErrorKind, LaunchedBrowser,
};
pub use error::{AdapterError, AdapterErrorKind};
pub use ids::{BrowserId, PageId, SessionId};
pub use metrics::AdapterMetricsSnapshot;
pub use resource::{BrowserProvider, BrowserResource, CdpBrowserProvider, ScopedBrowser};
pub use transport::{CdpTransport, CommandTarget, TransportEvent, WsTransport};

