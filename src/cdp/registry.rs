//! Session registry
//!
//! Tracks every attached target session (pages, cross-origin iframes,
//! workers) keyed by the session identifier the browser assigned on
//! attach. A background watcher follows Target lifecycle events so
//! sessions torn down by the browser are removed here too, and any
//! command still in flight against them fails instead of hanging.

use super::traits::CdpConnection;
use super::types::{AttachedToTargetParams, CdpEvent, DetachedFromTargetParams};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// One attached target session
#[derive(Debug)]
pub struct Session {
    /// Identifier the browser assigned on attach; routes commands
    session_id: String,
    /// Target this session is attached to
    target_id: String,
    /// Target type as reported by the browser ("page", "iframe", ...)
    target_type: String,
    /// Session of the parent target, for lookup only
    parent_session_id: Option<String>,
    /// Cleared when the target detaches or crashes
    alive: AtomicBool,
}

impl Session {
    fn new(
        session_id: &str,
        target_id: &str,
        target_type: &str,
        parent_session_id: Option<&str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.to_string(),
            target_id: target_id.to_string(),
            target_type: target_type.to_string(),
            parent_session_id: parent_session_id.map(String::from),
            alive: AtomicBool::new(true),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn parent_session_id(&self) -> Option<&str> {
        self.parent_session_id.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Error unless the session is still usable for commands
    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::stale_session(format!(
                "session {} is no longer attached",
                self.session_id
            )))
        }
    }
}

/// Session registry with a Target-event watcher
pub struct SessionRegistry {
    connection: Arc<dyn CdpConnection>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create a registry and start watching Target lifecycle events
    pub fn new(connection: Arc<dyn CdpConnection>) -> Arc<Self> {
        let registry = Arc::new(Self {
            connection,
            sessions: RwLock::new(HashMap::new()),
        });
        registry.spawn_watcher();
        registry
    }

    /// Attach to a target in flat mode and record the session
    pub async fn attach(
        &self,
        target_id: &str,
        target_type: &str,
        parent_session_id: Option<&str>,
    ) -> Result<Arc<Session>> {
        let result = self
            .connection
            .send_command(
                None,
                "Target.attachToTarget",
                Some(serde_json::json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
            )
            .await?;

        let response: super::types::AttachToTargetResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid attachToTarget response: {}", e)))?;

        debug!(
            "Attached to target {} ({}) as session {}",
            target_id, target_type, response.session_id
        );

        self.register(&response.session_id, target_id, target_type, parent_session_id)
    }

    /// Detach a session and remove its record
    pub async fn detach(&self, session: &Session) -> Result<()> {
        self.connection
            .send_command(
                None,
                "Target.detachFromTarget",
                Some(serde_json::json!({ "sessionId": session.session_id() })),
            )
            .await?;

        session.mark_dead();
        self.sessions
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .remove(session.session_id());

        Ok(())
    }

    /// Record a session, reusing the existing entry if one is present
    ///
    /// Auto-attach notifications and explicit attach calls can both
    /// observe the same session; whichever lands second must not
    /// replace the Session handle callers already hold.
    pub fn register(
        &self,
        session_id: &str,
        target_id: &str,
        target_type: &str,
        parent_session_id: Option<&str>,
    ) -> Result<Arc<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;

        if let Some(existing) = sessions.get(session_id) {
            return Ok(Arc::clone(existing));
        }

        let session = Session::new(session_id, target_id, target_type, parent_session_id);
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Look up a session by identifier
    pub fn resolve(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// All currently recorded sessions
    pub fn sessions(&self) -> Result<Vec<Arc<Session>>> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .values()
            .cloned()
            .collect())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Remove a session the browser tore down; fail its in-flight work
    async fn deactivate(&self, session_id: &str, reason: &str) {
        let removed = match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(session_id),
            Err(e) => {
                warn!("Lock error while removing session {}: {}", session_id, e);
                None
            }
        };

        if let Some(session) = removed {
            warn!("Session {} removed: {}", session_id, reason);
            session.mark_dead();
            self.connection.abort_session(session_id, reason).await;
        }
    }

    fn spawn_watcher(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        let connection = Arc::clone(&self.connection);

        tokio::spawn(async move {
            let mut events = match connection.subscribe("*", None).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Session watcher could not subscribe: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next_event().await {
                let registry = match registry.upgrade() {
                    Some(registry) => registry,
                    None => break,
                };
                registry.handle_target_event(event).await;
            }

            debug!("Session watcher stopped");
        });
    }

    async fn handle_target_event(&self, event: CdpEvent) {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                match serde_json::from_value::<AttachedToTargetParams>(event.params) {
                    Ok(params) => {
                        debug!(
                            "Target {} auto-attached as session {}",
                            params.target_info.target_id, params.session_id
                        );
                        // The carrying session, if any, is the parent.
                        if let Err(e) = self.register(
                            &params.session_id,
                            &params.target_info.target_id,
                            &params.target_info.target_type,
                            event.session_id.as_deref(),
                        ) {
                            warn!("Could not register auto-attached session: {}", e);
                        }
                    }
                    Err(e) => warn!("Malformed attachedToTarget payload: {}", e),
                }
            }
            "Target.detachedFromTarget" => {
                match serde_json::from_value::<DetachedFromTargetParams>(event.params) {
                    Ok(params) => {
                        self.deactivate(&params.session_id, "target detached").await;
                    }
                    Err(e) => warn!("Malformed detachedFromTarget payload: {}", e),
                }
            }
            "Target.targetCrashed" => {
                if let Some(session_id) = event.session_id.as_deref() {
                    self.deactivate(session_id, "target crashed").await;
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpConnection;
    use std::time::Duration;

    fn registry_with_mock() -> (Arc<MockCdpConnection>, Arc<SessionRegistry>) {
        let conn = Arc::new(MockCdpConnection::new());
        let registry = SessionRegistry::new(conn.clone() as Arc<dyn CdpConnection>);
        (conn, registry)
    }

    #[tokio::test]
    async fn test_attach_records_session() {
        let (conn, registry) = registry_with_mock();
        conn.enqueue_response(
            "Target.attachToTarget",
            serde_json::json!({ "sessionId": "S1" }),
        )
        .await;

        let session = registry.attach("T1", "page", None).await.unwrap();
        assert_eq!(session.session_id(), "S1");
        assert_eq!(session.target_id(), "T1");
        assert_eq!(session.target_type(), "page");
        assert!(session.is_alive());

        let resolved = registry.resolve("S1").unwrap();
        assert_eq!(resolved.session_id(), "S1");
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_attach_uses_flat_mode() {
        let (conn, registry) = registry_with_mock();
        registry.attach("T1", "page", None).await.unwrap();

        let calls = conn.calls_for("Target.attachToTarget").await;
        assert_eq!(calls.len(), 1);
        let params = calls[0].params.as_ref().unwrap();
        assert_eq!(params["targetId"], "T1");
        assert_eq!(params["flatten"], true);
    }

    #[tokio::test]
    async fn test_detach_removes_record() {
        let (conn, registry) = registry_with_mock();
        let session = registry.attach("T1", "page", None).await.unwrap();

        registry.detach(&session).await.unwrap();
        assert!(!session.is_alive());
        assert!(matches!(
            registry.resolve(session.session_id()),
            Err(Error::SessionNotFound(_))
        ));

        let calls = conn.calls_for("Target.detachFromTarget").await;
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_session() {
        let (_conn, registry) = registry_with_mock();
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_conn, registry) = registry_with_mock();

        let first = registry.register("S1", "T1", "page", None).unwrap();
        let second = registry.register("S1", "T1", "page", None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_watcher_registers_auto_attached_targets() {
        let (conn, registry) = registry_with_mock();

        conn.emit_method(
            "Target.attachedToTarget",
            serde_json::json!({
                "sessionId": "CHILD",
                "targetInfo": {
                    "targetId": "T-IFRAME",
                    "type": "iframe",
                    "title": "",
                    "url": "https://ads.example/frame",
                    "attached": true,
                },
                "waitingForDebugger": false,
            }),
            Some("PARENT"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = registry.resolve("CHILD").unwrap();
        assert_eq!(session.target_type(), "iframe");
        assert_eq!(session.parent_session_id(), Some("PARENT"));
    }

    #[tokio::test]
    async fn test_unsolicited_detach_marks_session_stale() {
        let (conn, registry) = registry_with_mock();
        conn.enqueue_response(
            "Target.attachToTarget",
            serde_json::json!({ "sessionId": "S1" }),
        )
        .await;
        let session = registry.attach("T1", "page", None).await.unwrap();

        conn.emit_method(
            "Target.detachedFromTarget",
            serde_json::json!({ "sessionId": "S1", "targetId": "T1" }),
            None,
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.is_alive());
        assert!(matches!(session.ensure_alive(), Err(Error::StaleSession(_))));
        assert!(matches!(
            registry.resolve("S1"),
            Err(Error::SessionNotFound(_))
        ));

        let aborted = conn.aborted_sessions().await;
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].0, "S1");
    }

    #[tokio::test]
    async fn test_target_crash_marks_session_stale() {
        let (conn, registry) = registry_with_mock();
        conn.enqueue_response(
            "Target.attachToTarget",
            serde_json::json!({ "sessionId": "S1" }),
        )
        .await;
        let session = registry.attach("T1", "page", None).await.unwrap();

        conn.emit_method(
            "Target.targetCrashed",
            serde_json::json!({ "targetId": "T1", "status": "crashed", "errorCode": 1 }),
            Some("S1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.is_alive());
        assert_eq!(registry.session_count(), 0);
    }
}
