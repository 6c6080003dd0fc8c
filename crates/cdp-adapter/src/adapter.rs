//! The [`Cdp`] surface and its DevTools-backed implementation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::WaitGate;
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::{BrowserId, PageId, SessionId};
use crate::metrics::{AdapterMetricsSnapshot, SessionMetrics};
use crate::network::NetworkTracker;
use crate::registry::Registry;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent, WsTransport};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A main-frame navigation observed after some earlier epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationMark {
    pub epoch: u64,
    pub url: Option<String>,
}

/// Page-level operations the scan kernel relies on.
#[async_trait]
pub trait Cdp: Send + Sync {
    /// Navigate and wait until the new document reports `interactive` or `complete`.
    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError>;

    /// Evaluate `expression` in the page's main world, awaiting promises and returning by value.
    async fn evaluate_script(&self, page: PageId, expression: &str)
        -> Result<Value, AdapterError>;

    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), AdapterError>;

    /// Number of main-frame navigations seen so far on `page`.
    fn navigation_epoch(&self, page: PageId) -> u64;

    /// Resolve with the latest navigation once the epoch exceeds `after_epoch`, or `None` when
    /// `timeout` passes first.
    async fn wait_for_navigation(
        &self,
        page: PageId,
        after_epoch: u64,
        timeout: Duration,
    ) -> Result<Option<NavigationMark>, AdapterError>;

    fn current_url(&self, page: PageId) -> Option<String>;
}

/// DevTools session for one browser: tracks its pages, their navigations and in-flight
/// requests from the event stream, and sends page commands.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    registry: Registry,
    closing: CancellationToken,
    events: Mutex<Option<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    network: NetworkTracker,
    metrics: SessionMetrics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct FrameNavigatedParams {
    frame: FramePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramePayload {
    id: String,
    parent_id: Option<String>,
    url: String,
    url_fragment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedWithinDocumentParams {
    frame_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkRequestParams {
    request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionThrownParams {
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    text: Option<String>,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, AdapterError> {
    serde_json::from_value(params).map_err(|err| AdapterError::internal(err.to_string()))
}

impl CdpAdapter {
    /// Open the websocket at `ws_url` and start following its events.
    pub async fn connect(ws_url: &str, cfg: CdpConfig) -> Result<Arc<Self>, AdapterError> {
        let deadline = Duration::from_millis(cfg.default_deadline_ms);
        let transport = WsTransport::connect(ws_url, deadline).await?;
        let adapter = Arc::new(Self::with_transport(cfg, Arc::new(transport))?);
        adapter.start().await?;
        Ok(adapter)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<Self, AdapterError> {
        let metrics = SessionMetrics::new()
            .map_err(|err| AdapterError::internal(format!("session metrics: {err}")))?;
        Ok(Self {
            browser_id: BrowserId::new(),
            cfg,
            registry: Registry::new(),
            closing: CancellationToken::new(),
            events: Mutex::new(None),
            transport,
            targets: DashMap::new(),
            network: NetworkTracker::new(),
            metrics,
        })
    }

    pub fn metrics(&self) -> AdapterMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the event loop and ask the browser to report target lifecycle.
    pub async fn start(self: &Arc<Self>) -> Result<(), AdapterError> {
        {
            let mut events = self.events.lock().await;
            if events.is_some() {
                return Ok(());
            }
            *events = Some(tokio::spawn(follow_events(
                Arc::downgrade(self),
                Arc::clone(&self.transport),
                self.closing.clone(),
            )));
        }
        self.send_command("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        info!(target: "cdp-adapter", browser = ?self.browser_id, engine = %self.cfg.engine, "session started");
        Ok(())
    }

    /// Stop following events. Synchronous, so it is safe from `Drop`.
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// [`CdpAdapter::close`] and wait for the event loop to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.events.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub(crate) fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(target) = &target_id {
            self.targets.insert(target.clone(), page);
        }
        self.registry
            .insert_page(page, session, target_id, cdp_session);
        self.network.reset(page);
    }

    /// Open a new tab, attach a flattened session to it and enable the domains the wait gates
    /// and navigation tracking depend on.
    pub async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::internal("createTarget missing targetId"))?
            .to_string();

        let attached = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let cdp_session = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::internal("attachToTarget missing sessionId"))?
            .to_string();

        let page = PageId::new();
        self.register_page(page, SessionId::new(), Some(target_id.clone()), Some(cdp_session));

        for method in ["Page.enable", "Network.enable", "Runtime.enable"] {
            self.send_page_command(page, method, json!({})).await?;
        }

        let tree = self
            .send_page_command(page, "Page.getFrameTree", json!({}))
            .await?;
        if let Some(frame_id) = tree
            .pointer("/frameTree/frame/id")
            .and_then(Value::as_str)
        {
            self.registry.set_main_frame(&page, frame_id.to_string());
        }

        debug!(target: "cdp-adapter", ?page, target = %target_id, "page attached");
        Ok(page)
    }

    pub async fn close_page(&self, page: PageId) -> Result<(), AdapterError> {
        let target = self.registry.get(&page).and_then(|ctx| ctx.target_id);
        self.forget_page(&page);
        if let Some(target_id) = target {
            self.targets.remove(&target_id);
            self.send_command("Target.closeTarget", json!({ "targetId": target_id }))
                .await?;
        }
        Ok(())
    }

    fn forget_page(&self, page: &PageId) {
        self.registry.remove_page(page);
        self.network.remove(page);
    }

    fn handle_event(&self, event: TransportEvent) {
        self.metrics.event();
        let method = event.method.clone();
        if let Err(err) = self.process_event(event) {
            debug!(target: "cdp-adapter", %method, %err, "could not decode event");
        }
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let page = self.page_from_session(event.session_id.as_deref());
        match event.method.as_str() {
            "Target.targetDestroyed" => {
                let payload: TargetDestroyedParams = decode(event.params)?;
                if let Some((_, page)) = self.targets.remove(&payload.target_id) {
                    debug!(target: "cdp-adapter", ?page, "page target destroyed");
                    self.forget_page(&page);
                }
            }
            "Target.detachedFromTarget" => {
                let payload: DetachedFromTargetParams = decode(event.params)?;
                if let Some(page) = self.page_from_session(Some(&payload.session_id)) {
                    warn!(target: "cdp-adapter", ?page, "page session detached");
                }
            }
            "Page.frameNavigated" => {
                if let Some(page) = page {
                    self.on_frame_navigated(page, decode(event.params)?);
                }
            }
            "Page.navigatedWithinDocument" => {
                if let Some(page) = page {
                    let payload: NavigatedWithinDocumentParams = decode(event.params)?;
                    if self.is_main_frame(&page, &payload.frame_id) {
                        self.on_main_frame_navigation(page, payload.url, true);
                    }
                }
            }
            "Network.requestWillBeSent" => {
                if let Some(page) = page {
                    let payload: NetworkRequestParams = decode(event.params)?;
                    self.network.on_request(page, &payload.request_id);
                }
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                if let Some(page) = page {
                    let payload: NetworkRequestParams = decode(event.params)?;
                    self.network.on_settled(page, &payload.request_id);
                }
            }
            "Runtime.exceptionThrown" => {
                let payload: ExceptionThrownParams = decode(event.params)?;
                let message = payload
                    .exception_details
                    .exception
                    .and_then(|ex| ex.description)
                    .or(payload.exception_details.text)
                    .unwrap_or_else(|| "runtime exception".to_string());
                debug!(target: "cdp-adapter", ?page, %message, "page script threw");
            }
            _ => {}
        }
        Ok(())
    }

    fn on_frame_navigated(&self, page: PageId, payload: FrameNavigatedParams) {
        if payload.frame.parent_id.is_some() {
            return;
        }
        self.registry.set_main_frame(&page, payload.frame.id);
        self.network.reset(page);
        let url = match payload.frame.url_fragment {
            Some(fragment) if !fragment.is_empty() => format!("{}{}", payload.frame.url, fragment),
            _ => payload.frame.url,
        };
        self.on_main_frame_navigation(page, url, false);
    }

    fn on_main_frame_navigation(&self, page: PageId, url: String, same_document: bool) {
        if let Some(epoch) = self.registry.record_navigation(&page, url.clone()) {
            self.metrics.navigation();
            debug!(target: "cdp-adapter", ?page, epoch, same_document, url = %url, "main frame navigated");
        }
    }

    fn is_main_frame(&self, page: &PageId, frame_id: &str) -> bool {
        match self.registry.main_frame(page) {
            Some(main) => main == frame_id,
            None => true,
        }
    }

    fn page_from_session(&self, session: Option<&str>) -> Option<PageId> {
        session.and_then(|sid| self.registry.page_for_cdp_session(sid))
    }

    async fn navigate_inner(&self, page: PageId, url: &str, deadline: Instant) -> Result<(), AdapterError> {
        let before = self.navigation_epoch(page);
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;

        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::Navigation)
                .with_hint(error_text.to_string())
                .with_data(json!({ "url": url })));
        }

        // cross-document loads report a loaderId; wait for the commit before polling readyState
        if response.get("loaderId").is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self
                .wait_for_navigation(page, before, remaining)
                .await?
                .is_none()
            {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint("navigation never committed")
                    .with_data(json!({ "url": url })));
            }
        }

        self.wait_for_dom_ready(page, deadline).await
    }

    async fn wait_for_dom_ready(&self, page: PageId, deadline: Instant) -> Result<(), AdapterError> {
        let mut last_error: Option<AdapterError> = None;
        loop {
            if Instant::now() >= deadline {
                let mut err = AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint("document never reached interactive");
                if let Some(last) = last_error {
                    err = err.with_data(json!({ "last_error": last.to_string() }));
                }
                return Err(err);
            }

            match self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": "document.readyState",
                        "returnByValue": true,
                    }),
                )
                .await
            {
                Ok(response) => {
                    let ready = response
                        .pointer("/result/value")
                        .and_then(Value::as_str)
                        .map(|state| matches!(state, "interactive" | "complete"))
                        .unwrap_or(false);
                    if ready {
                        return Ok(());
                    }
                }
                // contexts are torn down mid-navigation; keep polling
                Err(err) => last_error = Some(err),
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_network_quiet(
        &self,
        page: PageId,
        window_ms: u64,
        max_inflight: u32,
        deadline: Instant,
    ) -> Result<(), AdapterError> {
        let window = Duration::from_millis(window_ms);
        loop {
            let snapshot = self.network.snapshot(&page);
            if snapshot.is_quiet(window, max_inflight as usize) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint("network never went quiet")
                    .with_data(json!({ "inflight": snapshot.inflight })));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Browser, method, params).await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.get_cdp_session(&page).ok_or_else(|| {
            AdapterError::internal(format!("missing cdp session for page {page:?}"))
        })?;
        self.dispatch(CommandTarget::Session(session), method, params)
            .await
    }

    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        let result = self.transport.send_command(target, method, params).await;
        self.metrics
            .command_finished(method, start.elapsed(), result.is_ok());
        result
    }
}

impl Drop for CdpAdapter {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}

/// Feeds transport events to the adapter until it closes, goes away, or the stream ends.
async fn follow_events(
    adapter: Weak<CdpAdapter>,
    transport: Arc<dyn CdpTransport>,
    closing: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            event = transport.next_event() => event,
        };
        let event = match event {
            Some(event) => event,
            None => {
                warn!(target: "cdp-adapter", "devtools event stream ended");
                break;
            }
        };
        match adapter.upgrade() {
            Some(adapter) => adapter.handle_event(event),
            None => break,
        }
    }
    debug!(target: "cdp-adapter", "event loop stopped");
}

#[async_trait]
impl Cdp for CdpAdapter {
    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let deadline_at = Instant::now() + deadline;
        match tokio::time::timeout(deadline, self.navigate_inner(page, url, deadline_at)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("navigation exceeded {}ms", deadline.as_millis()))
                .with_data(json!({ "url": url }))),
        }
    }

    async fn evaluate_script(
        &self,
        page: PageId,
        expression: &str,
    ) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let description = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("evaluate_script raised exception")
                .to_string();
            return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                .with_hint(description)
                .with_data(details.clone()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        match gate {
            WaitGate::DomReady => self.wait_for_dom_ready(page, deadline).await,
            WaitGate::NetworkQuiet {
                window_ms,
                max_inflight,
            } => {
                self.wait_for_network_quiet(page, window_ms, max_inflight, deadline)
                    .await
            }
        }
    }

    fn navigation_epoch(&self, page: PageId) -> u64 {
        self.registry
            .navigation_state(&page)
            .map(|state| state.epoch)
            .unwrap_or(0)
    }

    async fn wait_for_navigation(
        &self,
        page: PageId,
        after_epoch: u64,
        timeout: Duration,
    ) -> Result<Option<NavigationMark>, AdapterError> {
        let mut rx = self
            .registry
            .subscribe_navigation(&page)
            .ok_or_else(|| AdapterError::internal(format!("unknown page {page:?}")))?;

        let waited = tokio::time::timeout(timeout, rx.wait_for(|state| state.epoch > after_epoch)).await;
        match waited {
            Ok(Ok(state)) => Ok(Some(NavigationMark {
                epoch: state.epoch,
                url: state.url.clone(),
            })),
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("page closed while waiting for navigation")),
            Err(_) => Ok(None),
        }
    }

    fn current_url(&self, page: PageId) -> Option<String> {
        self.registry.recent_url(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct MockTransport {
        polls: AtomicUsize,
        rx: Mutex<mpsc::Receiver<TransportEvent>>,
        commands: Mutex<Vec<(String, Value)>>,
        responses: Mutex<VecDeque<Value>>,
    }

    impl MockTransport {
        fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    polls: AtomicUsize::new(0),
                    rx: Mutex::new(rx),
                    commands: Mutex::new(Vec::new()),
                    responses: Mutex::new(VecDeque::new()),
                }),
                tx,
            )
        }

        async fn methods(&self) -> Vec<String> {
            self.commands
                .lock()
                .await
                .iter()
                .map(|(method, _)| method.clone())
                .collect()
        }

        async fn set_response(&self, value: Value) {
            self.responses.lock().await.push_back(value);
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
        async fn next_event(&self) -> Option<TransportEvent> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.rx.lock().await;
            guard.recv().await
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            self.commands
                .lock()
                .await
                .push((method.to_string(), params));
            Ok(self
                .responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Value::Null))
        }
    }

    async fn started_adapter() -> (
        Arc<CdpAdapter>,
        Arc<MockTransport>,
        mpsc::Sender<TransportEvent>,
        PageId,
    ) {
        let (transport, tx) = MockTransport::new_pair();
        let adapter = Arc::new(
            CdpAdapter::with_transport(
                CdpConfig::default(),
                transport.clone() as Arc<dyn CdpTransport>,
            )
            .unwrap(),
        );
        adapter.start().await.expect("start adapter");
        transport.commands.lock().await.clear();

        let page = PageId::new();
        adapter.register_page(page, SessionId::new(), Some("T1".into()), Some("S1".into()));
        adapter.registry.set_main_frame(&page, "F1".into());
        (adapter, transport, tx, page)
    }

    fn session_event(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.into(),
            params,
            session_id: Some("S1".into()),
        }
    }

    #[tokio::test]
    async fn create_page_attaches_and_enables_domains() {
        let (transport, _tx) = MockTransport::new_pair();
        let adapter = Arc::new(
            CdpAdapter::with_transport(
                CdpConfig::default(),
                transport.clone() as Arc<dyn CdpTransport>,
            )
            .unwrap(),
        );
        adapter.start().await.expect("start adapter");

        transport.set_response(json!({ "targetId": "T7" })).await;
        transport.set_response(json!({ "sessionId": "S7" })).await;
        for _ in 0..3 {
            transport.set_response(json!({})).await;
        }
        transport
            .set_response(json!({ "frameTree": { "frame": { "id": "F7", "url": "about:blank" } } }))
            .await;

        let page = adapter.create_page("about:blank").await.expect("create page");
        assert_eq!(adapter.registry.get_cdp_session(&page).as_deref(), Some("S7"));
        assert_eq!(adapter.registry.main_frame(&page).as_deref(), Some("F7"));
        assert_eq!(
            transport.methods().await,
            vec![
                "Target.setDiscoverTargets",
                "Target.createTarget",
                "Target.attachToTarget",
                "Page.enable",
                "Network.enable",
                "Runtime.enable",
                "Page.getFrameTree",
            ]
        );
        assert_eq!(adapter.metrics().commands, 7);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn navigate_polls_ready_state() {
        let (adapter, transport, _tx, page) = started_adapter().await;

        transport.set_response(json!({ "frameId": "F1" })).await;
        transport
            .set_response(json!({ "result": { "value": "loading" } }))
            .await;
        transport
            .set_response(json!({ "result": { "value": "complete" } }))
            .await;

        adapter
            .navigate(page, "https://example.com/#same-doc", Duration::from_secs(5))
            .await
            .expect("navigate through transport");

        let methods = transport.methods().await;
        assert_eq!(methods[0], "Page.navigate");
        assert_eq!(
            methods.iter().filter(|m| *m == "Runtime.evaluate").count(),
            2
        );
        let metrics = adapter.metrics();
        assert_eq!(metrics.commands_by_method.get("Runtime.evaluate"), Some(&2));
        assert_eq!(metrics.command_failures, 0);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn navigate_surfaces_error_text() {
        let (adapter, transport, _tx, page) = started_adapter().await;
        transport
            .set_response(json!({ "frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
            .await;

        let err = adapter
            .navigate(page, "https://nope.invalid", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Navigation);
        assert_eq!(err.hint.as_deref(), Some("net::ERR_NAME_NOT_RESOLVED"));

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn navigate_times_out_when_commit_never_arrives() {
        let (adapter, transport, _tx, page) = started_adapter().await;
        transport
            .set_response(json!({ "frameId": "F1", "loaderId": "L1" }))
            .await;

        let err = adapter
            .navigate(page, "https://slow.test", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::NavTimeout);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn only_main_frame_navigations_advance_the_epoch() {
        let (adapter, _transport, tx, page) = started_adapter().await;
        assert_eq!(adapter.navigation_epoch(page), 0);

        tx.send(session_event(
            "Page.frameNavigated",
            json!({ "frame": { "id": "F1", "url": "https://a.test/", "loaderId": "L1" } }),
        ))
        .await
        .unwrap();
        let mark = adapter
            .wait_for_navigation(page, 0, Duration::from_secs(1))
            .await
            .unwrap()
            .expect("first navigation");
        assert_eq!(mark.epoch, 1);
        assert_eq!(mark.url.as_deref(), Some("https://a.test/"));

        tx.send(session_event(
            "Page.frameNavigated",
            json!({ "frame": { "id": "F2", "parentId": "F1", "url": "https://ads.test/" } }),
        ))
        .await
        .unwrap();
        tx.send(session_event(
            "Page.navigatedWithinDocument",
            json!({ "frameId": "F1", "url": "https://a.test/#/settings" }),
        ))
        .await
        .unwrap();

        let mark = adapter
            .wait_for_navigation(page, 1, Duration::from_secs(1))
            .await
            .unwrap()
            .expect("history navigation");
        assert_eq!(mark.epoch, 2);
        assert_eq!(
            adapter.current_url(page).as_deref(),
            Some("https://a.test/#/settings")
        );

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn wait_for_navigation_returns_none_when_idle() {
        let (adapter, _transport, _tx, page) = started_adapter().await;
        let mark = adapter
            .wait_for_navigation(page, 0, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(mark.is_none());
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn network_quiet_follows_request_events() {
        let (adapter, _transport, tx, page) = started_adapter().await;

        tx.send(session_event(
            "Network.requestWillBeSent",
            json!({ "requestId": "R1" }),
        ))
        .await
        .unwrap();
        sleep(Duration::from_millis(20)).await;

        let gate = WaitGate::network_idle(50);
        let pending = adapter
            .wait_basic(page, gate.clone(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(pending.kind, AdapterErrorKind::NavTimeout);

        tx.send(session_event(
            "Network.loadingFinished",
            json!({ "requestId": "R1" }),
        ))
        .await
        .unwrap();
        adapter
            .wait_basic(page, gate, Duration::from_secs(2))
            .await
            .expect("network quiet after request settles");

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn script_exceptions_are_typed() {
        let (adapter, transport, _tx, page) = started_adapter().await;
        transport
            .set_response(json!({
                "result": { "type": "object", "subtype": "error" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "ReferenceError: axe is not defined" }
                }
            }))
            .await;

        let err = adapter.evaluate_script(page, "axe.run()").await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ScriptException);
        assert_eq!(
            err.hint.as_deref(),
            Some("ReferenceError: axe is not defined")
        );

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn target_destroyed_drops_the_page() {
        let (adapter, _transport, tx, page) = started_adapter().await;
        tx.send(TransportEvent {
            method: "Target.targetDestroyed".into(),
            params: json!({ "targetId": "T1" }),
            session_id: None,
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while adapter.registry.get(&page).is_some() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("page forgotten");
        let err = adapter
            .wait_for_navigation(page, 0, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.hint.unwrap().contains("unknown page"));
        assert!(adapter.metrics().events >= 1);

        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn dom_ready_gate_polls_until_interactive() {
        let (adapter, transport, _tx, page) = started_adapter().await;
        transport
            .set_response(json!({ "result": { "value": "loading" } }))
            .await;
        transport
            .set_response(json!({ "result": { "value": "interactive" } }))
            .await;

        adapter
            .wait_basic(page, WaitGate::DomReady, Duration::from_secs(2))
            .await
            .expect("document becomes interactive");
        assert_eq!(transport.methods().await.len(), 2);

        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_stops_once_the_stream_ends() {
        let (adapter, transport, tx, _page) = started_adapter().await;
        drop(tx);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.polls.load(Ordering::SeqCst), 1);
        assert!(adapter
            .events
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false));
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn close_stops_the_event_loop_without_awaiting() {
        let (adapter, transport, _tx, _page) = started_adapter().await;
        adapter.close();
        assert!(adapter.is_closed());
        adapter.shutdown().await;
        // the loop released its handle on the transport
        assert_eq!(Arc::strong_count(&transport), 2);
    }
}
