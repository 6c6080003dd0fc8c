//! Per-page in-flight request accounting backing the network-quiet wait gate.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::ids::PageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub inflight: usize,
    /// Time since the last request started or settled.
    pub quiet_for: Duration,
}

impl NetworkSnapshot {
    pub fn is_quiet(&self, window: Duration, max_inflight: usize) -> bool {
        self.inflight <= max_inflight && self.quiet_for >= window
    }
}

struct PageNetwork {
    inflight: HashSet<String>,
    last_activity: Instant,
}

impl PageNetwork {
    fn new() -> Self {
        Self {
            inflight: HashSet::new(),
            last_activity: Instant::now(),
        }
    }
}

#[derive(Default)]
pub struct NetworkTracker {
    pages: DashMap<PageId, PageNetwork>,
}

impl NetworkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Network.requestWillBeSent`. Redirect hops reuse the request id and count once.
    pub fn on_request(&self, page: PageId, request_id: &str) {
        let mut entry = self.pages.entry(page).or_insert_with(PageNetwork::new);
        entry.inflight.insert(request_id.to_string());
        entry.last_activity = Instant::now();
    }

    /// `Network.loadingFinished` / `Network.loadingFailed`.
    pub fn on_settled(&self, page: PageId, request_id: &str) {
        if let Some(mut entry) = self.pages.get_mut(&page) {
            entry.inflight.remove(request_id);
            entry.last_activity = Instant::now();
        }
    }

    /// A new document drops whatever the previous one still had pending.
    pub fn reset(&self, page: PageId) {
        self.pages.insert(page, PageNetwork::new());
    }

    pub fn remove(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn snapshot(&self, page: &PageId) -> NetworkSnapshot {
        match self.pages.get(page) {
            Some(entry) => NetworkSnapshot {
                inflight: entry.inflight.len(),
                quiet_for: entry.last_activity.elapsed(),
            },
            None => NetworkSnapshot {
                inflight: 0,
                quiet_for: Duration::MAX,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn quiet_only_after_window_with_nothing_pending() {
        let tracker = NetworkTracker::new();
        let page = PageId::new();
        let window = Duration::from_millis(500);

        tracker.on_request(page, "r1");
        tracker.on_request(page, "r1");
        tracker.on_request(page, "r2");
        assert_eq!(tracker.snapshot(&page).inflight, 2);

        tracker.on_settled(page, "r1");
        tracker.on_settled(page, "r2");
        assert!(!tracker.snapshot(&page).is_quiet(window, 0));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(tracker.snapshot(&page).is_quiet(window, 0));
    }

    #[test]
    fn unknown_page_is_quiet() {
        let tracker = NetworkTracker::new();
        assert!(tracker
            .snapshot(&PageId::new())
            .is_quiet(Duration::from_secs(5), 0));
    }

    #[tokio::test]
    async fn reset_clears_pending_requests() {
        let tracker = NetworkTracker::new();
        let page = PageId::new();
        tracker.on_request(page, "long-poll");
        tracker.reset(page);
        assert_eq!(tracker.snapshot(&page).inflight, 0);
    }
}
