//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};

/// Conditions [`crate::Cdp::wait_basic`] can wait for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitGate {
    /// `document.readyState` is `interactive` or `complete`.
    DomReady,
    /// No more than `max_inflight` requests and no network activity for `window_ms`.
    NetworkQuiet { window_ms: u64, max_inflight: u32 },
}

impl WaitGate {
    pub fn network_idle(window_ms: u64) -> Self {
        WaitGate::NetworkQuiet {
            window_ms,
            max_inflight: 0,
        }
    }
}
