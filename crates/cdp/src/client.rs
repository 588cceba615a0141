//! Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! A writer task owns the socket sink; a reader task routes command replies
//! to their waiting caller by id and queues every other frame for
//! [`CdpClient::read_event`]. Queued frames are unbounded so events that
//! arrive while a command is in flight are never lost.

use async_trait::async_trait;
use serde_json::{json, Value};
use sessionjar_core::error::DEVTOOLS_HINT;
use sessionjar_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LOAD_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// An unsolicited protocol message: `{method, params}` without an id.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

impl CdpEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Classify a raw frame. Frames without a `method` field are not events.
    pub fn from_frame(frame: Value) -> Option<Self> {
        let method = frame.get("method")?.as_str()?.to_string();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        Some(Self { method, params })
    }
}

/// The command/event surface the capture engine consumes.
///
/// [`CdpClient`] is the production implementation; tests script their own.
#[async_trait]
pub trait EventSource: Send {
    async fn send_command(&mut self, method: &str, params: Value) -> Result<Value>;

    /// Next event, or `Ok(None)` when nothing arrived within `timeout` or the
    /// frame read was not an event.
    async fn read_event(&mut self, timeout: Duration) -> Result<Option<CdpEvent>>;

    async fn close(&mut self);
}

/// A CDP WebSocket client bound to one target.
pub struct CdpClient {
    ws_url: String,
    /// Sender to write messages to the WebSocket. `None` once closed.
    ws_tx: Option<mpsc::Sender<String>>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Set by the reader task once the socket is gone.
    disconnected: Arc<AtomicBool>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Every frame that was not a reply to a pending command.
    frames: mpsc::UnboundedReceiver<Value>,
    command_timeout: Duration,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Connection(format!(
                "Failed to connect to DevTools websocket {}: {}. {}",
                ws_url, e, DEVTOOLS_HINT
            ))
        })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        // Channel for outgoing messages
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();
        let disconnected = Arc::new(AtomicBool::new(false));
        let disconnected_clone = disconnected.clone();

        let (frame_tx, frames) = mpsc::unbounded_channel::<Value>();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader task: reads from WebSocket, dispatches replies and queues the rest
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let val = match serde_json::from_str::<Value>(&text) {
                            Ok(val) => val,
                            Err(e) => {
                                warn!(error = %e, "Dropping non-JSON CDP frame");
                                continue;
                            }
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let waiter = pending_clone.lock().await.remove(&id);
                            if let Some(tx) = waiter {
                                let _ = tx.send(val);
                                continue;
                            }
                        }
                        if frame_tx.send(val).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Fail in-flight and future commands instead of letting them time out.
            disconnected_clone.store(true, Ordering::SeqCst);
            pending_clone.lock().await.clear();
        });

        debug!(ws_url = %ws_url, "CDP connection established");

        Ok(Self {
            ws_url: ws_url.to_string(),
            ws_tx: Some(ws_tx),
            pending,
            disconnected,
            next_id: AtomicU64::new(1),
            frames,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reader_handle: Some(reader_handle),
            writer_handle: Some(writer_handle),
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// True after [`CdpClient::close`] or once the browser dropped the socket.
    pub fn is_closed(&self) -> bool {
        self.ws_tx.is_none() || self.disconnected.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for the reply carrying the same id.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let ws_tx = self
            .ws_tx
            .as_ref()
            .ok_or_else(|| Error::Connection("CDP client is not connected".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            // The reader flags the disconnect before clearing under this lock.
            let mut pending = self.pending.lock().await;
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(Error::Connection(format!(
                    "DevTools connection to {} closed",
                    self.ws_url
                )));
            }
            pending.insert(id, tx);
        }

        if ws_tx.send(msg.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Connection(format!(
                "DevTools connection closed while sending {}",
                method
            )));
        }
        trace!(id, method, "CDP command sent");

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::ProtocolCommand {
                        method: method.to_string(),
                        message: error.to_string(),
                    })
                } else {
                    Ok(response.get("result").cloned().unwrap_or_else(|| json!({})))
                }
            }
            Ok(Err(_)) => Err(Error::Connection(format!(
                "DevTools connection closed before {} replied",
                method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Read the next queued frame, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and for frames that are not events
    /// (late or orphaned command replies).
    pub async fn read_event(&mut self, timeout: Duration) -> Result<Option<CdpEvent>> {
        match tokio::time::timeout(timeout, self.frames.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(frame)) => Ok(CdpEvent::from_frame(frame)),
            Ok(None) => Err(Error::Connection(format!(
                "DevTools connection to {} closed",
                self.ws_url
            ))),
        }
    }

    /// Discard queued frames. Returns how many were dropped.
    pub fn drain_events(&mut self) -> usize {
        let mut dropped = 0;
        while self.frames.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        // Dropping the sender ends the writer loop, which sends a close frame.
        if self.ws_tx.take().is_none() {
            return;
        }
        if let Some(writer) = self.writer_handle.take() {
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!(ws_url = %self.ws_url, "CDP writer did not finish in time");
            }
        }
        if let Some(reader) = self.reader_handle.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();
        debug!(ws_url = %self.ws_url, "CDP connection closed");
    }

    // ─── Domains ──────────────────────────────────────────────────────

    pub async fn enable_network(&self) -> Result<()> {
        self.send_command("Network.enable", json!({})).await?;
        Ok(())
    }

    pub async fn disable_network(&self) -> Result<()> {
        self.send_command("Network.disable", json!({})).await?;
        Ok(())
    }

    pub async fn enable_page_events(&self) -> Result<()> {
        self.send_command("Page.enable", json!({})).await?;
        Ok(())
    }

    // ─── Navigation ───────────────────────────────────────────────────

    pub async fn reload(&self, ignore_cache: bool) -> Result<()> {
        self.send_command("Page.reload", json!({ "ignoreCache": ignore_cache }))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({ "url": url })).await
    }

    /// Wait for `Page.loadEventFired`. `Ok(false)` means the wait timed out.
    pub async fn wait_for_load(&mut self, timeout: Duration) -> Result<bool> {
        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + MAX_LOAD_WAIT);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            if let Some(event) = self.read_event(remaining).await? {
                if event.method == "Page.loadEventFired" {
                    return Ok(true);
                }
            }
        }
    }

    // ─── Tab / Target management ──────────────────────────────────────

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::ProtocolCommand {
                method: "Target.createTarget".into(),
                message: "no targetId in reply".into(),
            })
    }

    /// Close a target by its targetId. Returns the browser's `success` flag.
    pub async fn close_target(&self, target_id: &str) -> Result<bool> {
        let result = self
            .send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

#[async_trait]
impl EventSource for CdpClient {
    async fn send_command(&mut self, method: &str, params: Value) -> Result<Value> {
        CdpClient::send_command(self, method, params).await
    }

    async fn read_event(&mut self, timeout: Duration) -> Result<Option<CdpEvent>> {
        CdpClient::read_event(self, timeout).await
    }

    async fn close(&mut self) {
        CdpClient::close(self).await
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader_handle.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer_handle.take() {
            writer.abort();
        }
    }
}
