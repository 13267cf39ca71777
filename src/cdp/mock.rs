//! Mock CDP connection for testing
//!
//! Answers commands from scripted responses (falling back to canned
//! per-method defaults), records every call, and lets tests inject
//! events into subscribers.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::cdp::traits::{CdpConnection, EventStream};
use crate::cdp::types::CdpEvent;
use crate::{Error, Result};

/// One recorded command invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug)]
struct MockSubscriber {
    method: String,
    session_id: Option<String>,
    sender: mpsc::UnboundedSender<CdpEvent>,
}

impl MockSubscriber {
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

/// Mock CDP connection
#[derive(Debug, Default)]
pub struct MockCdpConnection {
    closed: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<serde_json::Value>>>>,
    subscribers: Mutex<Vec<MockSubscriber>>,
    aborted: Mutex<Vec<(String, String)>>,
}

impl MockCdpConnection {
    /// Create a new mock CDP connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for the next call to `method`
    pub async fn enqueue_response(&self, method: &str, result: serde_json::Value) {
        self.scripted
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    /// Queue a protocol error for the next call to `method`
    pub async fn enqueue_error(&self, method: &str, code: i64, message: &str) {
        self.scripted
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push_back(Err(Error::protocol(method, code, message)));
    }

    /// All commands sent so far
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Commands sent so far with the given method
    pub async fn calls_for(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// Sessions aborted so far, with reasons
    pub async fn aborted_sessions(&self) -> Vec<(String, String)> {
        self.aborted.lock().await.clone()
    }

    /// Deliver an event to every matching subscriber
    pub async fn emit(&self, event: CdpEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| {
            !subscriber.matches(&event) || subscriber.sender.send(event.clone()).is_ok()
        });
    }

    /// Convenience for building and delivering an event in one step
    pub async fn emit_method(
        &self,
        method: &str,
        params: serde_json::Value,
        session_id: Option<&str>,
    ) {
        self.emit(CdpEvent {
            method: method.to_string(),
            params,
            session_id: session_id.map(String::from),
        })
        .await;
    }

    /// Canned fallback responses per method
    fn default_response(method: &str) -> serde_json::Value {
        match method {
            "Page.navigate" => serde_json::json!({
                "frameId": "MOCK-FRAME-1",
                "loaderId": "MOCK-LOADER-1",
            }),
            "Page.getFrameTree" => serde_json::json!({
                "frameTree": {
                    "frame": { "id": "MOCK-FRAME-1", "url": "about:blank" },
                }
            }),
            "Runtime.evaluate" => serde_json::json!({
                "result": { "type": "string", "value": "mock result" }
            }),
            "Page.captureScreenshot" => serde_json::json!({
                "data": "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg=="
            }),
            "DOM.getDocument" => serde_json::json!({
                "root": {
                    "nodeId": 1,
                    "backendNodeId": 1,
                    "nodeType": 9,
                    "nodeName": "#document",
                }
            }),
            "DOM.querySelector" => serde_json::json!({ "nodeId": 0 }),
            "DOM.querySelectorAll" => serde_json::json!({ "nodeIds": [] }),
            "Target.attachToTarget" => serde_json::json!({
                "sessionId": "MOCK-SESSION-1",
            }),
            "Target.createTarget" => serde_json::json!({
                "targetId": "MOCK-TARGET-1",
            }),
            "Target.getTargets" => serde_json::json!({
                "targetInfos": [],
            }),
            _ => serde_json::json!({}),
        }
    }
}

#[async_trait]
impl CdpConnection for MockCdpConnection {
    async fn send_command(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection_closed("mock connection is closed"));
        }

        self.calls.lock().await.push(RecordedCall {
            method: method.to_string(),
            session_id: session_id.map(String::from),
            params,
        });

        let scripted = self
            .scripted
            .lock()
            .await
            .get_mut(method)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(outcome) => outcome,
            None => Ok(Self::default_response(method)),
        }
    }

    async fn send_command_with_timeout(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
        _timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.send_command(session_id, method, params).await
    }

    async fn subscribe(&self, method: &str, session_id: Option<&str>) -> Result<EventStream> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection_closed("mock connection is closed"));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(MockSubscriber {
            method: method.to_string(),
            session_id: session_id.map(String::from),
            sender,
        });

        Ok(EventStream::new(receiver))
    }

    async fn abort_session(&self, session_id: &str, reason: &str) {
        self.aborted
            .lock()
            .await
            .push((session_id.to_string(), reason.to_string()));
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        self.subscribers.lock().await.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let conn = MockCdpConnection::new();

        conn.send_command(Some("S1"), "Page.enable", None)
            .await
            .unwrap();
        conn.send_command(None, "Target.getTargets", None)
            .await
            .unwrap();

        let calls = conn.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, "Page.enable");
        assert_eq!(calls[0].session_id.as_deref(), Some("S1"));
        assert_eq!(calls[1].session_id, None);
    }

    #[tokio::test]
    async fn test_scripted_response_then_default() {
        let conn = MockCdpConnection::new();
        conn.enqueue_response("Page.navigate", serde_json::json!({ "frameId": "F9" }))
            .await;

        let first = conn
            .send_command(None, "Page.navigate", None)
            .await
            .unwrap();
        assert_eq!(first["frameId"], "F9");

        let second = conn
            .send_command(None, "Page.navigate", None)
            .await
            .unwrap();
        assert_eq!(second["frameId"], "MOCK-FRAME-1");
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let conn = MockCdpConnection::new();
        conn.enqueue_error("DOM.querySelector", -32000, "node gone")
            .await;

        let err = conn
            .send_command(Some("S1"), "DOM.querySelector", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { code: -32000, .. }));
    }

    #[tokio::test]
    async fn test_emit_respects_filters() {
        let conn = MockCdpConnection::new();
        let mut on_s1 = conn.subscribe("*", Some("S1")).await.unwrap();
        let mut on_load = conn.subscribe("Page.loadEventFired", None).await.unwrap();

        conn.emit_method("Page.loadEventFired", serde_json::json!({}), Some("S1"))
            .await;
        conn.emit_method("Page.frameNavigated", serde_json::json!({}), Some("S2"))
            .await;

        let event = on_s1.next_event().await.unwrap();
        assert_eq!(event.method, "Page.loadEventFired");

        let event = on_load.next_event().await.unwrap();
        assert_eq!(event.session_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_commands() {
        let conn = MockCdpConnection::new();
        conn.close().await.unwrap();

        assert!(!conn.is_open());
        let err = conn.send_command(None, "Page.enable", None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
    }
}
