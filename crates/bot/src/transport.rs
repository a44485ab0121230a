//! Outbound WebSocket client to the chat gateway (§4.10). Owns the socket;
//! everything else enqueues outbound frames or awaits a correlated
//! response through this type.
//!
//! The reconnect-with-backoff and echo-correlation ideas are adapted from
//! `phoenix-channel`'s reconnecting WS client, re-expressed as a spawned
//! task reading one inbound `mpsc` channel rather than a manual
//! `Future::poll` state machine, matching `crates/gateway/src/ws.rs`'s
//! split-stream + write-loop-task idiom applied to an outbound connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use firefrp_common::BoxFuture;
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::frame::{ApiCallFrame, EventFrame, IncomingFrame};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Injected callback invoked for every inbound event frame. Kept generic
/// over `Arc<dyn Fn>` rather than a trait object owning the dispatcher, so
/// `BotTransport` and `BotDispatcher` can reference each other without a
/// cyclic constructor dependency.
pub type EventHandlerFn = Arc<dyn Fn(EventFrame) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct BotTransportConfig {
    pub ws_url: String,
    pub token: Option<SecretString>,
}

struct Inner {
    write_tx: Option<mpsc::UnboundedSender<Message>>,
    write_task: Option<JoinHandle<()>>,
    self_id: Option<String>,
}

/// Long-lived outbound connection to the chat gateway. Reconnects with
/// exponential backoff on close or error; pending `callApi` futures are
/// tracked by generated `echo` id and resolved or rejected as responses
/// arrive (or dropped on shutdown/timeout).
pub struct BotTransport {
    config: BotTransportConfig,
    inner: Mutex<Inner>,
    pending: DashMap<String, oneshot::Sender<std::result::Result<serde_json::Value, String>>>,
    event_handler: Mutex<Option<EventHandlerFn>>,
    shutdown: AtomicBool,
    reconnect_notify: Notify,
    supervisor_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BotTransport {
    pub fn new(config: BotTransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner { write_tx: None, write_task: None, self_id: None }),
            pending: DashMap::new(),
            event_handler: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
            supervisor_task: std::sync::Mutex::new(None),
        })
    }

    /// Registers the callback invoked for every inbound event. Must be set
    /// before [`Self::start`] to avoid dropping early events, since the
    /// dispatcher that implements it is constructed with a reference to
    /// this transport (breaking what would otherwise be a constructor
    /// cycle).
    pub async fn set_event_handler(&self, handler: EventHandlerFn) {
        *self.event_handler.lock().await = Some(handler);
    }

    pub async fn configured_self_id(&self) -> Option<String> {
        self.inner.lock().await.self_id.clone()
    }

    pub async fn set_self_id(&self, self_id: impl Into<String>) {
        self.inner.lock().await.self_id = Some(self_id.into());
    }

    /// Starts the reconnect loop in the background. Idempotent only in the
    /// sense that calling it twice spawns two supervising tasks — callers
    /// are expected to call it exactly once (§4.14 step 7).
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.reconnect_loop().await });
        if let Ok(mut guard) = self.supervisor_task.lock() {
            *guard = Some(handle);
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            match self.connect_once().await {
                Ok(()) => {
                    attempt = 0;
                },
                Err(e) => {
                    warn!(error = %e, "bot transport connection failed");
                },
            }

            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let delay = reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(delay_ms = delay.as_millis() as u64, "bot transport reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = self.reconnect_notify.notified() => {
                    return;
                }
            }
        }
    }

    /// Connects, runs the read loop until the connection drops, then
    /// returns so the caller can schedule a reconnect.
    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let url = self.build_url()?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BotError::ApiFailed { action: "connect".to_string(), reason: e.to_string() })?;
        info!("bot transport connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();

        let write_task = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        {
            let mut inner = self.inner.lock().await;
            inner.write_tx = Some(write_tx);
            inner.write_task = Some(write_task);
        }

        while let Some(msg) = ws_rx.next().await {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match msg {
                Ok(Message::Text(text)) => self.handle_incoming(&text).await,
                Ok(Message::Close(_)) => {
                    debug!("bot transport received close frame");
                    break;
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "bot transport read error");
                    break;
                },
            }
        }

        self.teardown_connection().await;
        Ok(())
    }

    async fn teardown_connection(&self) {
        let mut inner = self.inner.lock().await;
        inner.write_tx = None;
        if let Some(task) = inner.write_task.take() {
            task.abort();
        }
        drop(inner);
        self.fail_all_pending("connection lost");
    }

    fn build_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.config.ws_url)?;
        if let Some(token) = &self.config.token {
            url.query_pairs_mut().append_pair("access_token", token.expose_secret());
        }
        Ok(url)
    }

    async fn handle_incoming(&self, text: &str) {
        let frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable frame");
                return;
            },
        };

        match frame {
            IncomingFrame::ApiResponse(resp) => {
                if let Some((_, tx)) = self.pending.remove(&resp.echo) {
                    let result = if resp.is_ok() {
                        Ok(resp.data)
                    } else {
                        Err(if resp.message.is_empty() {
                            format!("status={}", resp.status)
                        } else {
                            resp.message
                        })
                    };
                    let _ = tx.send(result);
                }
            },
            IncomingFrame::Event(event) => {
                if self.inner.lock().await.self_id.is_none() {
                    if let Some(self_id) = &event.self_id {
                        self.inner.lock().await.self_id = Some(self_id.clone());
                    }
                }
                let handler = self.event_handler.lock().await.clone();
                if let Some(handler) = handler {
                    handler(event).await;
                }
            },
            IncomingFrame::Opaque(_) => {},
        }
    }

    fn fail_all_pending(&self, reason: &str) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(reason.to_string()));
            }
        }
    }

    /// Sends `{action, params, echo}` and awaits the matching response
    /// (§4.10). Times out after 10s; fails immediately if not currently
    /// connected.
    pub async fn call_api(&self, action: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let write_tx = self.inner.lock().await.write_tx.clone();
        let Some(write_tx) = write_tx else {
            return Err(BotError::Disconnected);
        };

        let echo = generate_echo();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(echo.clone(), tx);

        let frame = ApiCallFrame { action: action.to_string(), params, echo: echo.clone() };
        let text = serde_json::to_string(&frame)?;
        if write_tx.send(Message::Text(text.into())).is_err() {
            self.pending.remove(&echo);
            return Err(BotError::Disconnected);
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(reason))) => Err(BotError::ApiFailed { action: action.to_string(), reason }),
            Ok(Err(_)) => Err(BotError::Disconnected),
            Err(_) => {
                self.pending.remove(&echo);
                Err(BotError::Timeout { action: action.to_string() })
            },
        }
    }

    pub async fn send_group_message(&self, group_id: &str, user_id: &str, text: &str) -> Result<()> {
        let message = serde_json::json!([
            { "at": user_id },
            { "text": format!(" {text}") },
        ]);
        self.call_api(
            "send_group_msg",
            serde_json::json!({ "group_id": group_id, "message": message }),
        )
        .await?;
        Ok(())
    }

    /// `text` only, with no `at` segment — used for broadcast-style
    /// notifications that aren't replies to a specific user.
    pub async fn send_group_notice(&self, group_id: &str, text: &str) -> Result<()> {
        let message = serde_json::json!([{ "text": text }]);
        self.call_api(
            "send_group_msg",
            serde_json::json!({ "group_id": group_id, "message": message }),
        )
        .await?;
        Ok(())
    }

    pub async fn broadcast_group_message(&self, text: &str, groups: &[String]) {
        for group_id in groups {
            if let Err(e) = self.send_group_notice(group_id, text).await {
                warn!(group_id, error = %e, "failed to broadcast to group");
            }
        }
    }

    /// Drops the socket and rejects every pending `callApi` future
    /// (§4.14's graceful shutdown step 2).
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.reconnect_notify.notify_waiters();
        self.teardown_connection().await;
        let task = self.supervisor_task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(5));
    Duration::from_millis(millis).min(MAX_RECONNECT_DELAY)
}

fn generate_echo() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_and_caps_at_30s() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5), Duration::from_secs(30));
        assert_eq!(reconnect_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn build_url_appends_access_token_when_configured() {
        let config = BotTransportConfig {
            ws_url: "ws://localhost:8080/ws".to_string(),
            token: Some(SecretString::from("abc123".to_string())),
        };
        let transport = BotTransport::new(config);
        let url = transport.build_url().unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "access_token" && v == "abc123"));
    }

    #[tokio::test]
    async fn call_api_without_connection_fails_immediately() {
        let config = BotTransportConfig { ws_url: "ws://localhost:1/ws".to_string(), token: None };
        let transport = BotTransport::new(config);
        let err = transport.call_api("get_status", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, BotError::Disconnected));
    }
}
