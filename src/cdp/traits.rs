//! CDP connection abstraction
//!
//! The trait is the seam between the driver layer and the transport:
//! production code talks to a live WebSocket, tests substitute a mock.

use super::types::CdpEvent;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// Stream of events for one subscription
///
/// Ends (yields `None`) when the connection closes or is dropped; that
/// is normal shutdown, not an error.
#[derive(Debug)]
pub struct EventStream {
    inner: UnboundedReceiverStream<CdpEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<CdpEvent>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(receiver),
        }
    }

    /// Receive the next matching event
    pub async fn next_event(&mut self) -> Option<CdpEvent> {
        self.inner.next().await
    }
}

impl Stream for EventStream {
    type Item = CdpEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// CDP connection interface
///
/// One instance multiplexes every attached session over a single
/// transport. Commands correlate by id; events fan out to subscribers.
#[async_trait]
pub trait CdpConnection: Send + Sync + std::fmt::Debug {
    /// Send a command and wait for its response, using the per-method
    /// default timeout
    async fn send_command(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Send a command and wait for its response with an explicit timeout
    ///
    /// On timeout the pending slot is removed; a late answer from the
    /// browser is decoded and silently discarded.
    async fn send_command_with_timeout(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value>;

    /// Subscribe to events by method name, optionally scoped to one
    /// session
    ///
    /// `"*"` matches every method. A `None` session receives matching
    /// events from all sessions. Every subscriber registered before an
    /// event arrives receives it, in the order the reader observed it.
    async fn subscribe(&self, method: &str, session_id: Option<&str>) -> Result<EventStream>;

    /// Fail every in-flight command addressed to `session_id` with a
    /// stale-session error
    ///
    /// Used when the browser tears a target down: it will never answer
    /// commands already routed to that session.
    async fn abort_session(&self, session_id: &str, reason: &str);

    /// Close the connection: fail all pending commands with a transport
    /// error and end every subscriber stream
    async fn close(&self) -> Result<()>;

    /// Whether the connection is open for new commands
    fn is_open(&self) -> bool;
}
