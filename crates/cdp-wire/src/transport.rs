use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WireError;
use crate::DEFAULT_COMMAND_DEADLINE_MS;

/// A CDP event as delivered by the browser, before any interpretation.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

struct ControlMessage {
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, WireError>>,
}

/// One WebSocket channel to a single target (or the browser endpoint).
///
/// Commands are correlated to replies by the connection's `CallId`; events are
/// fanned out to every subscriber. The pump task drains all in-flight
/// commands with a terminal error when the socket closes or a frame fails to
/// decode, so callers never hang on a dead channel.
pub struct CdpChannel {
    ws_url: String,
    command_tx: mpsc::Sender<ControlMessage>,
    events: broadcast::Sender<TransportEvent>,
    alive: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl CdpChannel {
    pub async fn connect(ws_url: &str) -> Result<Self, WireError> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| WireError::Handshake(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let pump = tokio::spawn(Self::pump_loop(
            conn,
            command_rx,
            events.clone(),
            alive.clone(),
        ));

        debug!(target: "cdp-wire", url = %ws_url, "channel connected");

        Ok(Self {
            ws_url: ws_url.to_string(),
            command_tx,
            events,
            alive,
            pump,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Subscribe to the raw event stream of this channel. Subscribers filter
    /// by `method`; a lagged subscriber loses the oldest events, never new
    /// ones.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, WireError> {
        self.send_with_deadline(
            method,
            params,
            Duration::from_millis(DEFAULT_COMMAND_DEADLINE_MS),
        )
        .await
    }

    pub async fn send_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, WireError> {
        if !self.is_alive() {
            return Err(WireError::TransportGone("channel already closed".into()));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|_| WireError::TransportGone("command queue closed".into()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WireError::TransportGone(
                "command dropped before a reply arrived".into(),
            )),
            Err(_) => Err(WireError::CommandTimeout(deadline)),
        }
    }

    /// Idempotent close. In-flight commands fail with `TransportGone`.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::Relaxed) {
            debug!(target: "cdp-wire", url = %self.ws_url, "channel closed");
        }
        self.pump.abort();
    }

    async fn pump_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        events: broadcast::Sender<TransportEvent>,
        alive: Arc<AtomicBool>,
    ) {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, WireError>>> =
            HashMap::new();

        let terminal: WireError = loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        break WireError::TransportGone("channel handle dropped".into());
                    };
                    let method: MethodId = cmd.method.clone().into();
                    match conn.submit_command(method, None::<CdpSessionId>, cmd.params) {
                        Ok(call_id) => {
                            inflight.insert(call_id, cmd.responder);
                        }
                        Err(err) => {
                            let _ = cmd
                                .responder
                                .send(Err(WireError::TransportGone(err.to_string())));
                            break WireError::TransportGone(err.to_string());
                        }
                    }
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::dispatch_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            Self::dispatch_event(event, &events);
                        }
                        Some(Err(err)) => {
                            break Self::classify_stream_error(err);
                        }
                        None => {
                            break WireError::TransportGone("cdp connection closed".into());
                        }
                    }
                }
            }
        };

        alive.store(false, Ordering::Relaxed);
        for (_, sender) in inflight.drain() {
            let _ = sender.send(Err(terminal.clone()));
        }
        if matches!(terminal, WireError::Poisoned(_)) {
            warn!(target: "cdp-wire", error = %terminal, "channel poisoned");
        } else {
            debug!(target: "cdp-wire", error = %terminal, "pump loop finished");
        }
    }

    fn dispatch_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, WireError>>>,
    ) {
        let Some(sender) = inflight.remove(&resp.id) else {
            debug!(target: "cdp-wire", id = ?resp.id, "reply without a waiter");
            return;
        };
        let result = if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(WireError::Cdp {
                code: error.code,
                message: error.message,
            })
        } else {
            Ok(Value::Object(Default::default()))
        };
        let _ = sender.send(result);
    }

    fn dispatch_event(event: CdpEventMessage, events: &broadcast::Sender<TransportEvent>) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(target: "cdp-wire", ?err, "undecodable cdp event skipped");
                return;
            }
        };
        // send only fails when nobody is subscribed, which is fine
        let _ = events.send(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        });
    }

    fn classify_stream_error(err: CdpError) -> WireError {
        match err {
            CdpError::Serde(_) | CdpError::DecodeError(_) => WireError::Poisoned(err.to_string()),
            other => WireError::TransportGone(other.to_string()),
        }
    }

    #[cfg(test)]
    pub(crate) fn closed_stub() -> Self {
        let (command_tx, _) = mpsc::channel(1);
        let (events, _) = broadcast::channel(1);
        Self {
            ws_url: "ws://stub".into(),
            command_tx,
            events,
            alive: Arc::new(AtomicBool::new(false)),
            pump: tokio::spawn(async {}),
        }
    }
}

impl Drop for CdpChannel {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_on_closed_channel_reports_transport_gone() {
        let channel = CdpChannel::closed_stub();
        let err = channel
            .send("Browser.getVersion", json!({}))
            .await
            .expect_err("closed channel must not accept commands");
        assert!(matches!(err, WireError::TransportGone(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let channel = CdpChannel::closed_stub();
        channel.close();
        channel.close();
        assert!(!channel.is_alive());
    }
}
