//! CDP WebSocket connection implementation
//!
//! One background task owns the socket: it serializes every outgoing
//! frame, correlates responses to pending commands by id, and fans
//! events out to subscribers. Callers talk to the task through a
//! control channel, so no lock is ever held across socket I/O.

use super::codec;
use super::traits::{CdpConnection, EventStream};
use super::types::{CdpEvent, CdpRequest, CdpRpcResponse, IncomingMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Per-method timeout configuration
#[derive(Debug, Clone)]
pub struct CdpTimeoutConfig {
    /// Default timeout for most commands
    pub default: Duration,
    /// Timeout for page navigation commands
    pub navigation: Duration,
    /// Timeout for JavaScript execution
    pub execution: Duration,
    /// Timeout for screenshot capture
    pub screenshot: Duration,
}

impl Default for CdpTimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            navigation: Duration::from_secs(60),
            execution: Duration::from_secs(30),
            screenshot: Duration::from_secs(90),
        }
    }
}

impl CdpTimeoutConfig {
    /// Timeout for a specific command method
    fn for_method(&self, method: &str) -> Duration {
        if method.contains("captureScreenshot") || method.contains("printToPDF") {
            return self.screenshot;
        }

        if method.contains("navigate") || method.contains("reload") {
            return self.navigation;
        }

        if method.starts_with("Runtime.evaluate") || method.starts_with("Runtime.callFunctionOn") {
            return self.execution;
        }

        self.default
    }
}

/// Pending command state held by the reader loop
#[derive(Debug)]
struct PendingCommand {
    /// Resolution slot; resolved exactly once
    sender: oneshot::Sender<Result<serde_json::Value>>,
    /// Command method (for logging and protocol errors)
    method: String,
    /// Session the command was routed to
    session_id: Option<String>,
}

/// One registered event subscription
#[derive(Debug)]
struct Subscriber {
    /// Method filter; "*" matches every method
    method: String,
    /// Session filter; None matches every session
    session_id: Option<String>,
    sender: mpsc::UnboundedSender<CdpEvent>,
}

impl Subscriber {
    fn matches(&self, event: &CdpEvent) -> bool {
        if self.method != "*" && self.method != event.method {
            return false;
        }
        match &self.session_id {
            Some(session_id) => event.session_id.as_deref() == Some(session_id.as_str()),
            None => true,
        }
    }
}

/// Control messages from callers into the reader loop
enum Control {
    Send {
        id: u64,
        frame: String,
        method: String,
        session_id: Option<String>,
        responder: oneshot::Sender<Result<serde_json::Value>>,
    },
    Cancel {
        id: u64,
    },
    Subscribe {
        method: String,
        session_id: Option<String>,
        sender: mpsc::UnboundedSender<CdpEvent>,
    },
    AbortSession {
        session_id: String,
        reason: String,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// CDP WebSocket connection
#[derive(Debug)]
pub struct CdpWebSocketConnection {
    /// WebSocket URL
    url: String,
    /// Next command ID; monotonically increasing for the lifetime of
    /// this connection, never reused
    next_id: AtomicU64,
    /// Whether the connection accepts new work
    is_open: Arc<AtomicBool>,
    /// Channel into the reader loop
    control_tx: mpsc::UnboundedSender<Control>,
    /// Timeout configuration
    timeout_config: CdpTimeoutConfig,
}

impl CdpWebSocketConnection {
    /// Connect to a DevTools WebSocket endpoint
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:9222/devtools/browser/ABC123")
    pub async fn connect<S: Into<String>>(url: S) -> Result<Arc<Self>> {
        Self::connect_with_config(url, CdpTimeoutConfig::default()).await
    }

    /// Connect with explicit timeout configuration
    pub async fn connect_with_config<S: Into<String>>(
        url: S,
        timeout_config: CdpTimeoutConfig,
    ) -> Result<Arc<Self>> {
        let url = url.into();
        info!("Connecting to CDP WebSocket endpoint {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| Error::websocket(format!("Failed to connect to {}: {}", url, e)))?;

        info!("WebSocket connection established");

        Ok(Self::from_stream(url, ws_stream, timeout_config))
    }

    /// Connect, retrying while the endpoint is not accepting yet
    ///
    /// A freshly launched browser needs a moment before its debugging
    /// endpoint answers; retries cover that window, not later drops.
    pub async fn connect_with_retry<S: Into<String>>(
        url: S,
        attempts: u32,
        delay: Duration,
    ) -> Result<Arc<Self>> {
        let url = url.into();
        let attempts = attempts.max(1);
        let mut last_error = Error::websocket(format!("No connection attempts made for {}", url));

        for attempt in 1..=attempts {
            match Self::connect(url.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, url, e
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Wrap an established stream and start the reader loop
    fn from_stream(url: String, ws_stream: WsStream, timeout_config: CdpTimeoutConfig) -> Arc<Self> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let is_open = Arc::new(AtomicBool::new(true));

        let loop_open = Arc::clone(&is_open);
        tokio::spawn(async move {
            Self::reader_loop(ws_stream, control_rx, loop_open).await;
        });

        Arc::new(Self {
            url,
            next_id: AtomicU64::new(1),
            is_open,
            control_tx,
            timeout_config,
        })
    }

    /// Reader loop: sole owner of the socket
    ///
    /// The pending map and subscriber list live on this task's stack.
    /// Event delivery only enqueues into subscriber channels, so slow
    /// subscribers never stall command correlation.
    async fn reader_loop(
        mut ws_stream: WsStream,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        is_open: Arc<AtomicBool>,
    ) {
        let mut pending: HashMap<u64, PendingCommand> = HashMap::new();
        let mut subscribers: Vec<Subscriber> = Vec::new();

        debug!("Reader loop started");

        loop {
            tokio::select! {
                control = control_rx.recv() => {
                    match control {
                        Some(Control::Send { id, frame, method, session_id, responder }) => {
                            debug!("Sending CDP command {} ({})", id, method);
                            pending.insert(id, PendingCommand { sender: responder, method: method.clone(), session_id });
                            if let Err(e) = ws_stream.send(Message::Text(frame)).await {
                                error!("WebSocket write failed for command {} ({}): {}", id, method, e);
                                is_open.store(false, Ordering::SeqCst);
                                Self::fail_all_pending(&mut pending, &format!("write failed: {}", e));
                                subscribers.clear();
                                break;
                            }
                        }
                        Some(Control::Cancel { id }) => {
                            if pending.remove(&id).is_some() {
                                debug!("Removed pending command {} after caller timeout", id);
                            }
                        }
                        Some(Control::Subscribe { method, session_id, sender }) => {
                            debug!("Registering subscriber for {} (session {:?})", method, session_id);
                            subscribers.push(Subscriber { method, session_id, sender });
                        }
                        Some(Control::AbortSession { session_id, reason }) => {
                            let ids: Vec<u64> = pending
                                .iter()
                                .filter(|(_, command)| command.session_id.as_deref() == Some(session_id.as_str()))
                                .map(|(id, _)| *id)
                                .collect();
                            for id in ids {
                                if let Some(command) = pending.remove(&id) {
                                    warn!(
                                        "Failing in-flight command {} ({}) on dead session {}",
                                        id, command.method, session_id
                                    );
                                    let _ = command.sender.send(Err(Error::stale_session(reason.clone())));
                                }
                            }
                        }
                        Some(Control::Close { done }) => {
                            info!("Closing CDP WebSocket connection");
                            is_open.store(false, Ordering::SeqCst);
                            if let Err(e) = ws_stream.close(None).await {
                                debug!("WebSocket close handshake failed: {}", e);
                            }
                            Self::fail_all_pending(&mut pending, "connection closed");
                            subscribers.clear();
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            debug!("Connection handle dropped, stopping reader loop");
                            is_open.store(false, Ordering::SeqCst);
                            let _ = ws_stream.close(None).await;
                            Self::fail_all_pending(&mut pending, "connection dropped");
                            subscribers.clear();
                            break;
                        }
                    }
                }
                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(&text, &mut pending, &mut subscribers);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_stream.send(Message::Pong(data)).await {
                                warn!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket close frame received");
                            is_open.store(false, Ordering::SeqCst);
                            Self::fail_all_pending(&mut pending, "connection closed by peer");
                            subscribers.clear();
                            break;
                        }
                        Some(Ok(_)) => {
                            // CDP traffic is text frames only.
                        }
                        Some(Err(e)) => {
                            error!("WebSocket read error: {}", e);
                            is_open.store(false, Ordering::SeqCst);
                            Self::fail_all_pending(&mut pending, &format!("transport error: {}", e));
                            subscribers.clear();
                            break;
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            is_open.store(false, Ordering::SeqCst);
                            Self::fail_all_pending(&mut pending, "connection closed by peer");
                            subscribers.clear();
                            break;
                        }
                    }
                }
            }
        }

        debug!("Reader loop exited");
    }

    /// Process one incoming text frame
    fn handle_frame(
        text: &str,
        pending: &mut HashMap<u64, PendingCommand>,
        subscribers: &mut Vec<Subscriber>,
    ) {
        match codec::decode_message(text) {
            Ok(IncomingMessage::Response(response)) => {
                Self::resolve_pending(response, pending);
            }
            Ok(IncomingMessage::Event(event)) => {
                Self::dispatch_event(event, subscribers);
            }
            Err(e) => {
                // One bad frame never tears the connection down.
                warn!("Dropping undecodable frame: {}", e);
            }
        }
    }

    /// Resolve the pending command matching a response
    fn resolve_pending(response: CdpRpcResponse, pending: &mut HashMap<u64, PendingCommand>) {
        let command = match pending.remove(&response.id) {
            Some(command) => command,
            None => {
                debug!(
                    "Discarding reply for command {} with no pending slot",
                    response.id
                );
                return;
            }
        };

        let outcome = match response.error {
            Some(detail) => {
                debug!(
                    "Command {} ({}) answered with error: {} (code {})",
                    response.id, command.method, detail.message, detail.code
                );
                Err(Error::protocol(command.method, detail.code, detail.message))
            }
            None => {
                debug!("Command {} ({}) resolved", response.id, command.method);
                Ok(response.result)
            }
        };

        if command.sender.send(outcome).is_err() {
            debug!(
                "Response for command {} arrived after its waiter gave up",
                response.id
            );
        }
    }

    /// Fan an event out to every matching subscriber
    fn dispatch_event(event: CdpEvent, subscribers: &mut Vec<Subscriber>) {
        let mut dead_subscribers = Vec::new();

        for (i, subscriber) in subscribers.iter().enumerate() {
            if subscriber.matches(&event) && subscriber.sender.send(event.clone()).is_err() {
                dead_subscribers.push(i);
            }
        }

        for i in dead_subscribers.into_iter().rev() {
            debug!("Pruning dead event subscriber");
            subscribers.remove(i);
        }
    }

    /// Resolve every outstanding command with a transport failure
    fn fail_all_pending(pending: &mut HashMap<u64, PendingCommand>, reason: &str) {
        for (id, command) in pending.drain() {
            debug!("Failing pending command {} ({}): {}", id, command.method, reason);
            let _ = command.sender.send(Err(Error::connection_closed(reason)));
        }
    }
}

#[async_trait]
impl CdpConnection for CdpWebSocketConnection {
    async fn send_command(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let timeout = self.timeout_config.for_method(method);
        self.send_command_with_timeout(session_id, method, params, timeout)
            .await
    }

    async fn send_command_with_timeout(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if !self.is_open() {
            return Err(Error::connection_closed(format!(
                "connection to {} is closed",
                self.url
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(String::from),
        };
        let frame = codec::encode_command(&request)?;

        let (responder, receiver) = oneshot::channel();
        self.control_tx
            .send(Control::Send {
                id,
                frame,
                method: request.method,
                session_id: request.session_id,
                responder,
            })
            .map_err(|_| Error::connection_closed("connection reader is gone"))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::connection_closed(
                "connection closed while awaiting response",
            )),
            Err(_) => {
                // Remove the slot; a late reply will find nothing and
                // be discarded by the reader.
                let _ = self.control_tx.send(Control::Cancel { id });
                Err(Error::timeout(format!(
                    "Command {} ({}) timed out after {:?}",
                    id, method, timeout
                )))
            }
        }
    }

    async fn subscribe(&self, method: &str, session_id: Option<&str>) -> Result<EventStream> {
        if !self.is_open() {
            return Err(Error::connection_closed(
                "cannot subscribe on a closed connection",
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.control_tx
            .send(Control::Subscribe {
                method: method.to_string(),
                session_id: session_id.map(String::from),
                sender,
            })
            .map_err(|_| Error::connection_closed("connection reader is gone"))?;

        Ok(EventStream::new(receiver))
    }

    async fn abort_session(&self, session_id: &str, reason: &str) {
        let _ = self.control_tx.send(Control::AbortSession {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let (done, done_rx) = oneshot::channel();
        if self.control_tx.send(Control::Close { done }).is_ok() {
            let _ = done_rx.await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}
