//! One DevTools websocket per browser session.
//!
//! A pump task owns the socket: it submits queued calls, routes responses back by call id and
//! forwards protocol events. When the socket closes the pump fails whatever is still pending
//! and the event stream ends; a session that lost its browser is over, so nothing reconnects.

use std::collections::HashMap;
use std::convert::TryInto;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{AdapterError, AdapterErrorKind};

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Next protocol event, or `None` once the connection is gone for good.
    async fn next_event(&self) -> Option<TransportEvent>;

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type Reply = oneshot::Sender<Result<Value, AdapterError>>;

struct Call {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: Reply,
}

pub struct WsTransport {
    deadline: Duration,
    calls: mpsc::Sender<Call>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
}

impl WsTransport {
    /// Open the socket at `url`. Each command waits at most `deadline` for its response.
    pub async fn connect(url: &str, deadline: Duration) -> Result<Self, AdapterError> {
        let conn = Connection::<CdpEventMessage>::connect(url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(err.to_string())
                    .with_data(json!({ "url": url }))
            })?;
        let (calls, queued) = mpsc::channel(64);
        let (forward, events) = mpsc::channel(512);
        let pump = tokio::spawn(pump(conn, queued, forward));
        info!(target: "cdp-transport", %url, "devtools connection open");

        Ok(Self {
            deadline,
            calls,
            events: Mutex::new(events),
            pump,
        })
    }
}

#[async_trait]
impl CdpTransport for WsTransport {
    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let (reply, response) = oneshot::channel();
        let call = Call {
            target,
            method: method.to_string(),
            params,
            reply,
        };
        self.calls.send(call).await.map_err(|_| closed(method))?;

        match tokio::time::timeout(self.deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(closed(method)),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!(
                    "{method} got no response within {}ms",
                    self.deadline.as_millis()
                ))
                .retriable(true)),
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn closed(method: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CdpIo)
        .with_hint(format!("{method}: devtools connection closed"))
}

async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut queued: mpsc::Receiver<Call>,
    forward: mpsc::Sender<TransportEvent>,
) {
    let mut pending: HashMap<CallId, Reply> = HashMap::new();
    let reason = loop {
        tokio::select! {
            call = queued.recv() => match call {
                Some(call) => submit(&mut conn, call, &mut pending),
                None => break "transport dropped".to_string(),
            },
            message = conn.next() => match message {
                Some(Ok(Message::Response(response))) => {
                    if let Some(reply) = pending.remove(&response.id) {
                        let _ = reply.send(into_result(response));
                    }
                }
                Some(Ok(Message::Event(event))) => match decode_event(event) {
                    Ok(event) => {
                        // the adapter may already be gone; keep serving pending calls
                        let _ = forward.send(event).await;
                    }
                    Err(err) => debug!(target: "cdp-transport", %err, "skipping undecodable event"),
                },
                Some(Err(CdpError::Serde(err))) => {
                    debug!(target: "cdp-transport", %err, "skipping malformed message");
                }
                Some(Err(err)) => break err.to_string(),
                None => break "connection closed by the browser".to_string(),
            },
        }
    };

    debug!(target: "cdp-transport", %reason, pending = pending.len(), "pump stopped");
    let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint(reason);
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(err.clone()));
    }
}

fn submit(conn: &mut Connection<CdpEventMessage>, call: Call, pending: &mut HashMap<CallId, Reply>) {
    let session = match call.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
    };
    let method: MethodId = call.method.into();
    match conn.submit_command(method, session, call.params) {
        Ok(id) => {
            pending.insert(id, call.reply);
        }
        Err(err) => {
            let _ = call.reply.send(Err(
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
            ));
        }
    }
}

fn decode_event(event: CdpEventMessage) -> Result<TransportEvent, AdapterError> {
    let raw: CdpJsonEventMessage = event
        .try_into()
        .map_err(|err| AdapterError::internal(format!("cdp event: {err}")))?;
    Ok(TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    })
}

fn into_result(response: Response) -> Result<Value, AdapterError> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .with_data(json!({ "code": error.code }))),
        (None, None) => Err(AdapterError::internal("empty cdp response")),
    }
}
