//! Gateway (WebSocket) transport for the Discord event stream.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → IDENTIFY or RESUME
//!   - background heartbeat task with jitter and an ack watchdog
//!   - sequence number + session_id tracking, preserved across reconnects
//!   - automatic reconnect on disconnect, fixed 5s backoff
//!
//! The rest of the codebase never touches `tokio_tungstenite` directly; it
//! registers a dispatch callback and receives `(event_name, payload)` pairs
//! as opaque JSON. When we later swap transports we only need to touch this
//! file.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::types::{GatewayPayload, ReadyData};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Fixed reconnect backoff. The source attempts one connection cycle per
/// loop iteration and on any failure sleeps this long before retrying —
/// there is no give-up cap (see the reconnection policy this is grounded on).
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Delay observed before acting on an INVALID SESSION frame, per platform
/// guidance, regardless of whether it is resumable.
const INVALID_SESSION_SLEEP: Duration = Duration::from_secs(5);

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Dispatch callback
// ---------------------------------------------------------------------------

/// A boxed, cloneable callback invoked for every dispatch event.
pub type DispatchCallback =
    Arc<dyn Fn(String, serde_json::Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// Gateway intents bitmask.
    pub intents: u32,
    /// Override the gateway URL (used by tests against a local mock server).
    /// Production callers leave this `None` and get `DEFAULT_GATEWAY_URL`.
    pub url_override: Option<String>,
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_url: Option<String>,
    last_sequence: Option<u64>,
}

// ---------------------------------------------------------------------------
// WebSocket writer wrapper (transport boundary)
// ---------------------------------------------------------------------------

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Message,
>;

type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the read loop decided should happen to the (now-closed) connection.
enum DisconnectReason {
    /// Preserve session state and reconnect with RESUME.
    ShouldResume,
    /// Clear session state and reconnect with IDENTIFY.
    ShouldReidentify,
    /// `stop()` was called; do not reconnect.
    Stopped,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Owns one logical gateway session across however many physical
/// reconnections it takes to keep it alive.
pub struct GatewaySession {
    config: GatewayConfig,
    dispatch: DispatchCallback,
    state: Mutex<SessionState>,
    stop_tx: watch::Sender<bool>,
}

/// Wait until `rx` observes `true`, returning immediately if it already has.
/// A plain `rx.changed().await` would miss a stop signal sent before this
/// receiver started watching; checking the current value first closes that
/// race.
async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    let _ = rx.changed().await;
}

impl GatewaySession {
    pub fn new(config: GatewayConfig, dispatch: DispatchCallback) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            dispatch,
            state: Mutex::new(SessionState::default()),
            stop_tx,
        })
    }

    /// Flip the desired-state flag. Any task awaiting [`wait_for_stop`]
    /// wakes up without needing to wait for the next inbound frame.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn is_running(&self) -> bool {
        !*self.stop_tx.subscribe().borrow()
    }

    /// Run the connect loop until `stop()` is called. Intended to be awaited
    /// from a task the Supervisor spawns.
    pub async fn run(self: Arc<Self>) {
        while self.is_running() {
            let reason = self.run_one_connection().await;

            match reason {
                DisconnectReason::Stopped => return,
                DisconnectReason::ShouldReidentify => {
                    let mut s = self.state.lock().await;
                    s.session_id = None;
                    s.last_sequence = None;
                }
                DisconnectReason::ShouldResume => {}
            }

            if !self.is_running() {
                return;
            }

            info!(delay_secs = RECONNECT_BACKOFF.as_secs(), "reconnecting after backoff");
            let mut stop_rx = self.stop_tx.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                _ = wait_for_stop(&mut stop_rx) => return,
            }
        }
    }

    /// Run a single physical connection from open to close, returning why it
    /// closed. Any failure short of a hard stop is reported as
    /// `ShouldResume` so the outer loop retries with session state intact.
    async fn run_one_connection(self: &Arc<Self>) -> DisconnectReason {
        let url = {
            let s = self.state.lock().await;
            s.resume_url.clone().unwrap_or_else(|| {
                self.config
                    .url_override
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string())
            })
        };

        info!(url = %url, "connecting to gateway");

        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                return DisconnectReason::ShouldResume;
            }
        };
        info!("gateway WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));

        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO");
                return DisconnectReason::ShouldResume;
            }
        };
        debug!(interval_ms = heartbeat_interval, "received HELLO");

        if let Err(e) = self.authenticate(&ws_write).await {
            error!(error = %e, "failed to authenticate");
            return DisconnectReason::ShouldResume;
        }

        let ack_pending = Arc::new(AtomicBool::new(false));
        let watchdog = Arc::new(Notify::new());
        let (hb_cancel_tx, hb_cancel_rx) = mpsc::channel::<()>(1);

        let heartbeat_handle = tokio::spawn(heartbeat_task(
            heartbeat_interval,
            Arc::clone(&ws_write),
            Arc::clone(self),
            Arc::clone(&ack_pending),
            Arc::clone(&watchdog),
            hb_cancel_rx,
        ));

        // Dispatches are handed to a single consumer over a channel rather
        // than spawned independently, so the dispatch callback is invoked in
        // the same order the frames were received — a multi-threaded runtime
        // would otherwise let independently-spawned tasks race each other.
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<(String, serde_json::Value)>(256);
        let dispatch_handle = tokio::spawn(run_dispatch_consumer(Arc::clone(&self.dispatch), dispatch_rx));

        let reason = self
            .read_loop(&mut ws_read, &ws_write, &ack_pending, &watchdog, &dispatch_tx)
            .await;

        let _ = hb_cancel_tx.send(()).await;
        heartbeat_handle.abort();

        drop(dispatch_tx);
        let _ = dispatch_handle.await;

        {
            let mut w = ws_write.lock().await;
            let _ = w
                .send(tokio_tungstenite::tungstenite::Message::Close(None))
                .await;
        }

        reason
    }

    async fn authenticate(self: &Arc<Self>, ws_write: &Arc<Mutex<WsSink>>) -> Result<(), String> {
        let should_resume = {
            let s = self.state.lock().await;
            s.session_id.is_some() && s.last_sequence.is_some()
        };

        let frame = if should_resume {
            let s = self.state.lock().await;
            json!({
                "op": 6,
                "d": {
                    "token": self.config.token,
                    "session_id": s.session_id.as_ref().unwrap(),
                    "seq": s.last_sequence.unwrap(),
                }
            })
        } else {
            json!({
                "op": 2,
                "d": {
                    "token": self.config.token,
                    "intents": self.config.intents,
                    "properties": {
                        "os": std::env::consts::OS,
                        "browser": "discord-bridge",
                        "device": "discord-bridge",
                    }
                }
            })
        };

        if should_resume {
            info!("sending RESUME");
        } else {
            info!("sending IDENTIFY");
        }

        send_frame(ws_write, &frame).await.map_err(|e| e.to_string())
    }

    async fn read_loop(
        self: &Arc<Self>,
        ws_read: &mut WsStream,
        ws_write: &Arc<Mutex<WsSink>>,
        ack_pending: &Arc<AtomicBool>,
        watchdog: &Arc<Notify>,
        dispatch_tx: &mpsc::Sender<(String, serde_json::Value)>,
    ) -> DisconnectReason {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                biased;

                _ = wait_for_stop(&mut stop_rx) => {
                    return DisconnectReason::Stopped;
                }

                _ = watchdog.notified() => {
                    warn!("heartbeat ack watchdog fired, forcing reconnect");
                    return DisconnectReason::ShouldResume;
                }

                msg = ws_read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read error");
                            return DisconnectReason::ShouldResume;
                        }
                        None => {
                            info!("gateway WebSocket stream ended");
                            return DisconnectReason::ShouldResume;
                        }
                    };

                    match msg {
                        tokio_tungstenite::tungstenite::Message::Text(text) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "failed to parse gateway payload; closing connection");
                                    return DisconnectReason::ShouldResume;
                                }
                            };

                            if let Some(reason) = self
                                .handle_frame(payload, ws_write, ack_pending, dispatch_tx)
                                .await
                            {
                                return reason;
                            }
                        }

                        tokio_tungstenite::tungstenite::Message::Close(frame) => {
                            warn!(close = ?frame, "gateway WebSocket closed by server");
                            return DisconnectReason::ShouldResume;
                        }

                        _ => {}
                    }
                }
            }
        }
    }

    /// Handle one decoded frame. Returns `Some(reason)` if the connection
    /// must close, `None` to keep reading.
    async fn handle_frame(
        self: &Arc<Self>,
        payload: GatewayPayload,
        ws_write: &Arc<Mutex<WsSink>>,
        ack_pending: &Arc<AtomicBool>,
        dispatch_tx: &mpsc::Sender<(String, serde_json::Value)>,
    ) -> Option<DisconnectReason> {
        match payload.op {
            // DISPATCH
            0 => {
                if let Some(seq) = payload.s {
                    let mut s = self.state.lock().await;
                    s.last_sequence = Some(seq);
                }

                let event_name = payload.t.clone().unwrap_or_default();
                let data = payload.d.clone().unwrap_or(serde_json::Value::Null);

                if event_name == "READY" {
                    if let Some(d) = payload.d.clone() {
                        match serde_json::from_value::<ReadyData>(d) {
                            Ok(ready) => {
                                let mut s = self.state.lock().await;
                                s.session_id = Some(ready.session_id.clone());
                                s.resume_url = Some(ready.resume_gateway_url);
                                info!(session_id = %ready.session_id, "gateway READY");
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to parse READY payload");
                            }
                        }
                    }
                } else if event_name == "RESUMED" {
                    info!("gateway session resumed");
                }

                if dispatch_tx.send((event_name, data)).await.is_err() {
                    warn!("dispatch consumer gone; dropping event");
                }

                None
            }

            // HEARTBEAT REQUEST
            1 => {
                let seq = self.state.lock().await.last_sequence;
                let heartbeat = json!({"op": 1, "d": seq});
                if let Err(e) = send_frame(ws_write, &heartbeat).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                None
            }

            // RECONNECT
            7 => {
                info!("gateway requested reconnect (op 7)");
                Some(DisconnectReason::ShouldResume)
            }

            // INVALID SESSION
            9 => {
                let resumable = payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false);
                warn!(resumable, "session invalidated (op 9)");
                tokio::time::sleep(INVALID_SESSION_SLEEP).await;
                if resumable {
                    Some(DisconnectReason::ShouldResume)
                } else {
                    Some(DisconnectReason::ShouldReidentify)
                }
            }

            // HELLO — only legal as the first frame, handled in read_hello.
            10 => {
                error!("received unexpected HELLO after handshake");
                Some(DisconnectReason::ShouldResume)
            }

            // HEARTBEAT ACK
            11 => {
                ack_pending.store(false, Ordering::SeqCst);
                debug!("heartbeat acknowledged");
                None
            }

            other => {
                warn!(op = other, "unrecognized opcode; closing connection");
                Some(DisconnectReason::ShouldResume)
            }
        }
    }
}

/// Drains dispatch events one at a time, awaiting the callback fully before
/// pulling the next one, so events reach it in the order the read loop saw
/// them regardless of how many worker threads the runtime has.
async fn run_dispatch_consumer(
    dispatch: DispatchCallback,
    mut rx: mpsc::Receiver<(String, serde_json::Value)>,
) {
    while let Some((event_name, data)) = rx.recv().await {
        dispatch(event_name, data).await;
    }
}

async fn read_hello(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {e}"))?;

    let text = match msg {
        tokio_tungstenite::tungstenite::Message::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {other:?}")),
    };

    let payload: GatewayPayload =
        serde_json::from_str(&text).map_err(|e| format!("failed to parse HELLO: {e}"))?;

    if payload.op != 10 {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO payload missing heartbeat_interval".to_string())
}

async fn send_frame(
    ws_write: &Arc<Mutex<WsSink>>,
    frame: &serde_json::Value,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = frame.to_string();
    let mut w = ws_write.lock().await;
    w.send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
        .await
}

async fn heartbeat_task(
    interval_ms: u64,
    ws_write: Arc<Mutex<WsSink>>,
    session: Arc<GatewaySession>,
    ack_pending: Arc<AtomicBool>,
    watchdog: Arc<Notify>,
    mut cancel_rx: mpsc::Receiver<()>,
) {
    let jitter = rand::random::<f64>();
    let first_delay = Duration::from_millis((interval_ms as f64 * jitter) as u64);
    tokio::select! {
        _ = tokio::time::sleep(first_delay) => {}
        _ = cancel_rx.recv() => return,
    }

    loop {
        if ack_pending.load(Ordering::SeqCst) {
            warn!("previous heartbeat was never acknowledged");
            watchdog.notify_one();
            return;
        }

        let seq = session.state.lock().await.last_sequence;
        let heartbeat = json!({"op": 1, "d": seq});
        if let Err(e) = send_frame(&ws_write, &heartbeat).await {
            warn!(error = %e, "heartbeat send failed");
            return;
        }
        ack_pending.store(true, Ordering::SeqCst);
        debug!(?seq, "sent heartbeat");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            _ = cancel_rx.recv() => return,
        }
    }
}
