//! Adapter registry keeping track of active pages, their DevTools sessions and main-frame
//! navigation state.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub main_frame_id: Option<String>,
    pub recent_url: Option<String>,
}

/// Main-frame navigation counter. `epoch` increases by one per observed navigation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NavState {
    pub epoch: u64,
    pub url: Option<String>,
}

/// Concurrent registry for pages and sessions.
#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
    sessions: DashMap<String, PageId>,
    navigation: DashMap<PageId, Arc<watch::Sender<NavState>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(cdp) = &cdp_session {
            self.sessions.insert(cdp.clone(), page);
        }
        let ctx = TargetContext {
            session_id: session,
            target_id,
            cdp_session,
            main_frame_id: None,
            recent_url: None,
        };
        self.pages.insert(page, ctx);
        let (tx, _rx) = watch::channel(NavState::default());
        self.navigation.insert(page, Arc::new(tx));
    }

    pub fn remove_page(&self, page: &PageId) {
        if let Some((_, ctx)) = self.pages.remove(page) {
            if let Some(cdp) = ctx.cdp_session {
                self.sessions.remove(&cdp);
            }
        }
        self.navigation.remove(page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn page_for_cdp_session(&self, cdp_session: &str) -> Option<PageId> {
        self.sessions.get(cdp_session).map(|entry| *entry.value())
    }

    pub fn set_main_frame(&self, page: &PageId, frame_id: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.main_frame_id = Some(frame_id);
        }
    }

    pub fn main_frame(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.main_frame_id.clone())
    }

    /// Bump the navigation epoch for `page`; returns the new epoch.
    pub fn record_navigation(&self, page: &PageId, url: String) -> Option<u64> {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url.clone());
        }
        let sender = self.navigation.get(page)?.value().clone();
        let mut epoch = 0;
        sender.send_modify(|state| {
            state.epoch += 1;
            state.url = Some(url);
            epoch = state.epoch;
        });
        Some(epoch)
    }

    pub fn navigation_state(&self, page: &PageId) -> Option<NavState> {
        self.navigation
            .get(page)
            .map(|sender| sender.borrow().clone())
    }

    pub fn subscribe_navigation(&self, page: &PageId) -> Option<watch::Receiver<NavState>> {
        self.navigation.get(page).map(|sender| sender.subscribe())
    }

    pub fn recent_url(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.recent_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_epochs_increase_per_page() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), Some("T1".into()), Some("S1".into()));

        let mut rx = registry.subscribe_navigation(&page).unwrap();
        assert_eq!(registry.record_navigation(&page, "https://a.test/".into()), Some(1));
        assert_eq!(registry.record_navigation(&page, "https://a.test/next".into()), Some(2));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().epoch, 2);
        assert_eq!(
            registry.recent_url(&page).as_deref(),
            Some("https://a.test/next")
        );
    }

    #[test]
    fn removing_a_page_drops_session_index() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), None, Some("S9".into()));
        assert_eq!(registry.page_for_cdp_session("S9"), Some(page));
        registry.remove_page(&page);
        assert!(registry.page_for_cdp_session("S9").is_none());
        assert!(registry.record_navigation(&page, "about:blank".into()).is_none());
    }
}
