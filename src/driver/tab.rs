//! Tab controller
//!
//! One attached page target: navigation with load waiting, JavaScript
//! evaluation scoped to the current frame, frame switching, element
//! lookup, screenshots, and automatic proxy authentication. A
//! background pump consumes the tab session's events to keep the frame
//! tree and lifecycle state current.

use super::element::{self, Element};
use super::frame::{Frame, FrameTarget, FrameTree};
use super::intercept::{self, FetchInterception, RequestStage};
use crate::cdp::registry::{Session, SessionRegistry};
use crate::cdp::traits::{CdpConnection, EventStream};
use crate::cdp::types::{
    AuthRequiredParams, CaptureScreenshotResponse, CdpEvent, EvaluateParams, EvaluateResponse,
    ExecutionContextCreatedParams, ExecutionContextDestroyedParams, FrameAttachedParams,
    FrameDetachedParams, FrameNavigatedParams, GetFrameTreeResponse, GetOuterHtmlResponse,
    GetTargetsResponse, NavigateParams, NavigateResponse, NavigationHistoryResponse, RemoteObject,
    RequestWillBeSentParams, ResponseReceivedParams, TargetInfo, TargetInfoChangedParams,
};
use crate::config::Config;
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle states of a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Created,
    Navigating,
    Loaded,
    Closed,
}

/// Document ready state levels, ordered loading < interactive < complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "loading" => Some(ReadyState::Loading),
            "interactive" => Some(ReadyState::Interactive),
            "complete" => Some(ReadyState::Complete),
            _ => None,
        }
    }
}

/// Screenshot output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotFormat {
    Png,
    /// JPEG with quality 0-100
    Jpeg(u8),
    Webp,
}

impl ScreenshotFormat {
    fn format_name(self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg(_) => "jpeg",
            ScreenshotFormat::Webp => "webp",
        }
    }

    fn quality(self) -> Option<u8> {
        match self {
            ScreenshotFormat::Jpeg(quality) => Some(quality),
            _ => None,
        }
    }
}

/// Session and context scoping for commands aimed at the current frame
#[derive(Debug, Clone)]
pub(crate) struct CommandScope {
    pub session_id: String,
    /// Set for same-process subframes; None means the session default
    pub context_id: Option<i64>,
    pub frame_id: String,
}

/// One attached browser tab
pub struct Tab {
    /// Local handle id, independent of any browser-assigned id
    tab_id: Uuid,
    target_id: String,
    session: Arc<Session>,
    connection: Arc<dyn CdpConnection>,
    registry: Arc<SessionRegistry>,
    config: Config,
    frames: FrameTree,
    /// Latest target info from targetInfoChanged events
    target_info: Mutex<Option<TargetInfo>>,
    state_tx: watch::Sender<TabState>,
    /// Bumped by every navigate call; earlier waits notice and fail
    /// as superseded
    nav_epoch: AtomicU64,
    closed: AtomicBool,
    network_enabled: AtomicBool,
    /// Set while a user interception scope owns paused requests
    user_intercept: Arc<AtomicBool>,
    /// Handle back to this tab's own Arc, for element handles
    self_weak: Weak<Tab>,
}

impl Tab {
    /// Attach to a page target and set up event routing
    pub(crate) async fn attach(
        connection: Arc<dyn CdpConnection>,
        registry: Arc<SessionRegistry>,
        config: Config,
        target_id: &str,
    ) -> Result<Arc<Self>> {
        let session = registry.attach(target_id, "page", None).await?;

        // Subscribe before enabling domains so no event slips past.
        let events = connection
            .subscribe("*", Some(session.session_id()))
            .await?;

        let (state_tx, _) = watch::channel(TabState::Created);
        let tab = Arc::new_cyclic(|self_weak| Self {
            tab_id: Uuid::new_v4(),
            target_id: target_id.to_string(),
            session,
            connection,
            registry,
            config,
            frames: FrameTree::new(),
            target_info: Mutex::new(None),
            state_tx,
            nav_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            network_enabled: AtomicBool::new(false),
            user_intercept: Arc::new(AtomicBool::new(false)),
            self_weak: self_weak.clone(),
        });

        tab.enable_domains().await?;
        tab.seed_frames().await?;
        Self::spawn_pump(Arc::downgrade(&tab), events);

        info!(
            "Attached tab {} to target {} as session {}",
            tab.tab_id,
            target_id,
            tab.session.session_id()
        );
        Ok(tab)
    }

    async fn enable_domains(&self) -> Result<()> {
        let session_id = self.session.session_id();
        self.connection
            .send_command(Some(session_id), "Page.enable", None)
            .await?;
        self.connection
            .send_command(Some(session_id), "Runtime.enable", None)
            .await?;
        self.connection
            .send_command(Some(session_id), "DOM.enable", None)
            .await?;

        // Cross-origin iframes attach themselves as child sessions.
        self.connection
            .send_command(
                Some(session_id),
                "Target.setAutoAttach",
                Some(serde_json::json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                })),
            )
            .await?;

        if self.config.has_proxy_credentials() {
            self.connection
                .send_command(
                    Some(session_id),
                    "Fetch.enable",
                    Some(serde_json::json!({
                        "patterns": [{ "urlPattern": "*" }],
                        "handleAuthRequests": true,
                    })),
                )
                .await?;
        }

        Ok(())
    }

    async fn seed_frames(&self) -> Result<()> {
        let result = self
            .connection
            .send_command(Some(self.session.session_id()), "Page.getFrameTree", None)
            .await?;
        let response: GetFrameTreeResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getFrameTree response: {}", e)))?;
        self.frames.seed(&response.frame_tree)
    }

    fn spawn_pump(tab: Weak<Tab>, mut events: EventStream) {
        tokio::spawn(async move {
            let mut responded_auth: HashSet<String> = HashSet::new();
            while let Some(event) = events.next_event().await {
                let tab = match tab.upgrade() {
                    Some(tab) => tab,
                    None => break,
                };
                tab.handle_event(event, &mut responded_auth).await;
            }
            debug!("Tab event pump stopped");
        });
    }

    async fn handle_event(&self, event: CdpEvent, responded_auth: &mut HashSet<String>) {
        match event.method.as_str() {
            "Page.loadEventFired" => {
                self.state_tx.send_replace(TabState::Loaded);
            }
            "Page.frameAttached" => {
                match serde_json::from_value::<FrameAttachedParams>(event.params) {
                    Ok(params) => self
                        .frames
                        .on_frame_attached(&params.frame_id, &params.parent_frame_id),
                    Err(e) => warn!("Malformed frameAttached payload: {}", e),
                }
            }
            "Page.frameNavigated" => {
                match serde_json::from_value::<FrameNavigatedParams>(event.params) {
                    Ok(params) => self.frames.on_frame_navigated(&params.frame),
                    Err(e) => warn!("Malformed frameNavigated payload: {}", e),
                }
            }
            "Page.frameDetached" => {
                match serde_json::from_value::<FrameDetachedParams>(event.params) {
                    Ok(params) => self.frames.on_frame_detached(&params.frame_id),
                    Err(e) => warn!("Malformed frameDetached payload: {}", e),
                }
            }
            "Runtime.executionContextCreated" => {
                match serde_json::from_value::<ExecutionContextCreatedParams>(event.params) {
                    Ok(params) => self.frames.on_context_created(&params.context),
                    Err(e) => warn!("Malformed executionContextCreated payload: {}", e),
                }
            }
            "Runtime.executionContextDestroyed" => {
                match serde_json::from_value::<ExecutionContextDestroyedParams>(event.params) {
                    Ok(params) => self.frames.on_context_destroyed(params.execution_context_id),
                    Err(e) => warn!("Malformed executionContextDestroyed payload: {}", e),
                }
            }
            "Runtime.executionContextsCleared" => {
                self.frames.on_contexts_cleared();
            }
            "Target.targetInfoChanged" => {
                match serde_json::from_value::<TargetInfoChangedParams>(event.params) {
                    Ok(params) if params.target_info.target_id == self.target_id => {
                        if let Ok(mut info) = self.target_info.lock() {
                            *info = Some(params.target_info);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Malformed targetInfoChanged payload: {}", e),
                }
            }
            "Fetch.authRequired" => {
                self.handle_auth_required(event.params, responded_auth);
            }
            "Fetch.requestPaused" => {
                self.handle_request_paused(event.params);
            }
            _ => {}
        }
    }

    /// Answer an auth challenge with configured credentials, exactly
    /// once per challenge id
    fn handle_auth_required(&self, params: serde_json::Value, responded: &mut HashSet<String>) {
        let params: AuthRequiredParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!("Malformed authRequired payload: {}", e);
                return;
            }
        };

        if !responded.insert(params.request_id.clone()) {
            debug!("Ignoring repeated auth challenge {}", params.request_id);
            return;
        }

        let auth_response = if self.config.has_proxy_credentials() {
            serde_json::json!({
                "response": "ProvideCredentials",
                "username": self.config.proxy_username,
                "password": self.config.proxy_password,
            })
        } else {
            serde_json::json!({ "response": "CancelAuth" })
        };

        let payload = serde_json::json!({
            "requestId": params.request_id,
            "authChallengeResponse": auth_response,
        });

        // Answer off the pump so event dispatch never waits on it.
        let connection = Arc::clone(&self.connection);
        let session_id = self.session.session_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = connection
                .send_command(Some(&session_id), "Fetch.continueWithAuth", Some(payload))
                .await
            {
                debug!("Auth challenge response failed: {}", e);
            }
        });
    }

    /// Pass paused requests through when no interception scope is live
    fn handle_request_paused(&self, params: serde_json::Value) {
        if self.user_intercept.load(Ordering::SeqCst) {
            return;
        }

        let request_id = match params.get("requestId").and_then(|v| v.as_str()) {
            Some(request_id) => request_id.to_string(),
            None => return,
        };

        let connection = Arc::clone(&self.connection);
        let session_id = self.session.session_id().to_string();
        tokio::spawn(async move {
            let payload = serde_json::json!({ "requestId": request_id });
            if let Err(e) = connection
                .send_command(Some(&session_id), "Fetch.continueRequest", Some(payload))
                .await
            {
                debug!("Pass-through continue failed: {}", e);
            }
        });
    }

    // -----------------------------------------------------------------
    // Navigation

    /// Navigate and wait for the load event
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.navigate_with_timeout(url, self.config.nav_timeout()).await
    }

    /// Alias for navigate with the configured navigation timeout
    pub async fn get(&self, url: &str) -> Result<()> {
        self.navigate(url).await
    }

    /// Navigate with an explicit overall deadline
    ///
    /// A newer navigate call on the same tab supersedes this wait.
    pub async fn navigate_with_timeout(&self, url: &str, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let epoch = self.nav_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state_rx = self.state_tx.subscribe();
        self.state_tx.send_replace(TabState::Navigating);
        info!("Navigating tab {} to {}", self.target_id, url);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let params = NavigateParams {
            url: url.to_string(),
            referrer: None,
            transition_type: None,
        };
        let result = self
            .connection
            .send_command_with_timeout(
                Some(self.session.session_id()),
                "Page.navigate",
                Some(serde_json::to_value(params)?),
                timeout,
            )
            .await?;

        let response: NavigateResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid navigate response: {}", e)))?;
        if let Some(error_text) = response.error_text {
            return Err(Error::navigation_failed(format!("{}: {}", url, error_text)));
        }

        loop {
            if self.nav_epoch.load(Ordering::SeqCst) != epoch {
                return Err(Error::navigation_superseded(url));
            }
            match *state_rx.borrow_and_update() {
                TabState::Loaded => return Ok(()),
                TabState::Closed => {
                    return Err(Error::stale_session("tab closed during navigation"))
                }
                _ => {}
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::internal("tab state channel closed"));
                    }
                }
                _ = &mut deadline => {
                    return Err(Error::timeout(format!(
                        "Navigation to {} timed out after {:?}",
                        url, timeout
                    )));
                }
            }
        }
    }

    /// Wait until document.readyState reaches at least the given level
    pub async fn wait_for_ready_state(
        &self,
        at_least: ReadyState,
        timeout: Duration,
    ) -> Result<ReadyState> {
        self.ensure_open()?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let value = self.evaluate("document.readyState").await?;
            if let Some(state) = value.as_str().and_then(ReadyState::parse) {
                if state >= at_least {
                    return Ok(state);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!(
                    "Document ready state did not reach {:?} within {:?}",
                    at_least, timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval().min(remaining)).await;
        }
    }

    /// Reload the current document
    pub async fn reload(&self, ignore_cache: bool) -> Result<()> {
        self.ensure_open()?;
        // Mark before sending so a fast load event is not overwritten.
        self.state_tx.send_replace(TabState::Navigating);
        self.session_command(
            self.session.session_id(),
            "Page.reload",
            Some(serde_json::json!({ "ignoreCache": ignore_cache })),
        )
        .await?;
        Ok(())
    }

    /// Go back one entry in the tab's history
    pub async fn back(&self) -> Result<()> {
        self.step_history(-1).await
    }

    /// Go forward one entry in the tab's history
    pub async fn forward(&self) -> Result<()> {
        self.step_history(1).await
    }

    async fn step_history(&self, delta: i64) -> Result<()> {
        let result = self
            .session_command(
                self.session.session_id(),
                "Page.getNavigationHistory",
                None,
            )
            .await?;
        let history: NavigationHistoryResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid navigation history: {}", e)))?;

        let index = history.current_index + delta;
        if index < 0 || index as usize >= history.entries.len() {
            return Err(Error::navigation_failed(format!(
                "no history entry at offset {}",
                delta
            )));
        }

        let entry_id = history.entries[index as usize].id;
        self.state_tx.send_replace(TabState::Navigating);
        self.session_command(
            self.session.session_id(),
            "Page.navigateToHistoryEntry",
            Some(serde_json::json!({ "entryId": entry_id })),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Script evaluation

    /// Run an expression in the current frame and return its value
    ///
    /// Promises are awaited; an undefined result comes back as null. A
    /// thrown exception surfaces as a script execution error, distinct
    /// from timeouts and transport failures.
    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let object = self.evaluate_object(expression, true).await?;
        Ok(object.value.unwrap_or(serde_json::Value::Null))
    }

    /// Run an expression and keep the remote object reference
    pub async fn evaluate_handle(&self, expression: &str) -> Result<RemoteObject> {
        self.evaluate_object(expression, false).await
    }

    async fn evaluate_object(&self, expression: &str, by_value: bool) -> Result<RemoteObject> {
        self.ensure_open()?;
        let scope = self.command_scope()?;

        let params = EvaluateParams {
            expression: expression.to_string(),
            await_promise: Some(true),
            return_by_value: Some(by_value),
            context_id: scope.context_id,
        };
        let result = self
            .session_command(
                &scope.session_id,
                "Runtime.evaluate",
                Some(serde_json::to_value(params)?),
            )
            .await?;

        let response: EvaluateResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid evaluate response: {}", e)))?;
        if let Some(details) = response.exception_details {
            return Err(Error::script_execution_failed(details.message()));
        }
        Ok(response.result)
    }

    // -----------------------------------------------------------------
    // Frames

    /// Snapshot of the tab's frames, pre-order from the root
    pub fn frames(&self) -> Result<Vec<Frame>> {
        self.frames.frames()
    }

    /// The frame commands are currently scoped to
    pub fn current_frame(&self) -> Result<Frame> {
        self.frames.current()
    }

    /// Point subsequent element and evaluate calls at a frame
    pub async fn switch_to(&self, target: FrameTarget) -> Result<()> {
        self.ensure_open()?;
        match target {
            FrameTarget::Root => self.frames.switch_to_root(),
            FrameTarget::Id(frame_id) => {
                self.prepare_frame(&frame_id).await?;
                self.frames.switch_to_id(&frame_id)
            }
            FrameTarget::Selector(selector) => {
                let frame_id = self.frame_id_for_selector(&selector).await?;
                self.prepare_frame(&frame_id).await?;
                self.frames.switch_to_id(&frame_id)
            }
            FrameTarget::Element(element) => {
                let frame_id = element.content_frame_id().await?;
                self.prepare_frame(&frame_id).await?;
                self.frames.switch_to_id(&frame_id)
            }
        }
    }

    /// Switch to the i-th frame in pre-order at this moment
    pub async fn switch_to_index(&self, index: usize) -> Result<()> {
        self.ensure_open()?;
        let frame = self.frames.frame_at_index(index)?;
        self.prepare_frame(&frame.frame_id).await?;
        self.frames.switch_to_id(&frame.frame_id)
    }

    /// Resolve a selector in the current frame to an iframe's frame id
    async fn frame_id_for_selector(&self, selector: &str) -> Result<String> {
        let element = self
            .find_with_timeout(selector, self.config.command_timeout())
            .await
            .map_err(|e| match e {
                Error::ElementNotFound(_) => {
                    Error::frame_not_found(format!("no iframe matches selector {:?}", selector))
                }
                other => other,
            })?;
        element.content_frame_id().await
    }

    /// Attach a cross-origin frame's own session if not yet cached
    async fn prepare_frame(&self, frame_id: &str) -> Result<()> {
        let frame = self.frames.get(frame_id)?;
        if frame.is_root() || frame.session_id.is_some() || frame.execution_context_id.is_some() {
            return Ok(());
        }

        // Auto-attach usually got there first; reuse its session.
        if let Ok(sessions) = self.registry.sessions() {
            if let Some(session) = sessions
                .iter()
                .find(|s| s.target_id() == frame_id && s.is_alive())
            {
                self.frames.set_frame_session(frame_id, session.session_id());
                return Ok(());
            }
        }

        // For an out-of-process iframe the frame id doubles as its
        // target id.
        let result = self
            .connection
            .send_command(None, "Target.getTargets", None)
            .await?;
        let targets: GetTargetsResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getTargets response: {}", e)))?;

        if let Some(target) = targets
            .target_infos
            .into_iter()
            .find(|t| t.target_id == frame_id)
        {
            let session = self
                .registry
                .attach(
                    &target.target_id,
                    &target.target_type,
                    Some(self.session.session_id()),
                )
                .await?;
            self.frames.set_frame_session(frame_id, session.session_id());
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Elements

    /// Poll for the first element matching a selector in the current
    /// frame
    pub async fn find(&self, selector: &str) -> Result<Arc<Element>> {
        self.find_with_timeout(selector, self.config.command_timeout())
            .await
    }

    /// Poll for the first match with an explicit deadline
    pub async fn find_with_timeout(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Arc<Element>> {
        element::find(self, None, selector, timeout).await
    }

    /// Poll until at least one element matches, then return every
    /// match from the final query
    pub async fn find_all(&self, selector: &str) -> Result<Vec<Arc<Element>>> {
        self.find_all_with_timeout(selector, self.config.command_timeout())
            .await
    }

    /// Poll for all matches with an explicit deadline
    pub async fn find_all_with_timeout(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Vec<Arc<Element>>> {
        element::find_all(self, None, selector, timeout).await
    }

    /// Poll for the first element whose text matches
    pub async fn find_by_text(&self, text: &str) -> Result<Arc<Element>> {
        element::find_by_text(self, text, self.config.command_timeout()).await
    }

    // -----------------------------------------------------------------
    // Page content and appearance

    /// Current URL of the tab's main frame
    ///
    /// Served from the latest target info when the browser has pushed
    /// one, otherwise read live from the page.
    pub async fn url(&self) -> Result<String> {
        if let Some(url) = self.cached_target_info(|info| info.url.clone())? {
            return Ok(url);
        }
        let value = self.root_evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Current document title
    pub async fn title(&self) -> Result<String> {
        if let Some(title) = self.cached_target_info(|info| info.title.clone())? {
            return Ok(title);
        }
        let value = self.root_evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn cached_target_info<F: FnOnce(&TargetInfo) -> String>(
        &self,
        read: F,
    ) -> Result<Option<String>> {
        let info = self
            .target_info
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
        match info.as_ref() {
            Some(info) => {
                let value = read(info);
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            None => Ok(None),
        }
    }

    /// Serialized HTML of the current frame's document
    pub async fn content(&self) -> Result<String> {
        let scope = self.command_scope()?;
        let document = element::frame_document_node(self, &scope).await?;
        let result = self
            .session_command(
                &scope.session_id,
                "DOM.getOuterHTML",
                Some(serde_json::json!({ "nodeId": document })),
            )
            .await?;
        let response: GetOuterHtmlResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getOuterHTML response: {}", e)))?;
        Ok(response.outer_html)
    }

    /// Replace the current frame's document
    pub async fn set_content(&self, html: &str) -> Result<()> {
        let scope = self.command_scope()?;
        self.session_command(
            &scope.session_id,
            "Page.setDocumentContent",
            Some(serde_json::json!({ "frameId": scope.frame_id, "html": html })),
        )
        .await?;
        Ok(())
    }

    /// Capture a screenshot of the viewport
    pub async fn screenshot(&self, format: ScreenshotFormat) -> Result<Vec<u8>> {
        self.capture_screenshot(format, false).await
    }

    /// Capture a screenshot of the full scrollable page
    pub async fn screenshot_full_page(&self, format: ScreenshotFormat) -> Result<Vec<u8>> {
        self.capture_screenshot(format, true).await
    }

    async fn capture_screenshot(
        &self,
        format: ScreenshotFormat,
        beyond_viewport: bool,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut params = serde_json::json!({
            "format": format.format_name(),
            "captureBeyondViewport": beyond_viewport,
        });
        if let Some(quality) = format.quality() {
            params["quality"] = serde_json::json!(quality);
        }

        let result = self
            .session_command(self.session.session_id(), "Page.captureScreenshot", Some(params))
            .await?;
        let response: CaptureScreenshotResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid screenshot response: {}", e)))?;

        BASE64
            .decode(response.data.as_bytes())
            .map_err(|e| Error::decode(format!("Invalid screenshot encoding: {}", e)))
    }

    /// Bring this tab to the foreground
    pub async fn bring_to_front(&self) -> Result<()> {
        self.session_command(self.session.session_id(), "Page.bringToFront", None)
            .await?;
        Ok(())
    }

    /// Override the user agent for this tab
    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.session_command(
            self.session.session_id(),
            "Emulation.setUserAgentOverride",
            Some(serde_json::json!({ "userAgent": user_agent })),
        )
        .await?;
        Ok(())
    }

    /// Override the viewport size for this tab
    pub async fn set_window_size(&self, width: u32, height: u32) -> Result<()> {
        self.session_command(
            self.session.session_id(),
            "Emulation.setDeviceMetricsOverride",
            Some(serde_json::json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            })),
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Events and network

    /// Wait for the next event of the given method on this tab's
    /// session
    pub async fn wait_for_event(&self, method: &str, timeout: Duration) -> Result<CdpEvent> {
        self.ensure_open()?;
        let mut events = self
            .connection
            .subscribe(method, Some(self.session.session_id()))
            .await?;

        match tokio::time::timeout(timeout, events.next_event()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(Error::connection_closed("event stream ended")),
            Err(_) => Err(Error::timeout(format!(
                "No {} event within {:?}",
                method, timeout
            ))),
        }
    }

    /// Wait for the next request whose URL contains the fragment
    pub async fn expect_request(
        &self,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<RequestWillBeSentParams> {
        self.ensure_open()?;
        // Subscribe before enabling so nothing fires into the gap.
        let mut events = self
            .connection
            .subscribe("Network.requestWillBeSent", Some(self.session.session_id()))
            .await?;
        self.enable_network().await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!(
                    "No request matching {:?} within {:?}",
                    url_fragment, timeout
                )));
            }

            let event = tokio::time::timeout(remaining, events.next_event())
                .await
                .map_err(|_| {
                    Error::timeout(format!(
                        "No request matching {:?} within {:?}",
                        url_fragment, timeout
                    ))
                })?
                .ok_or_else(|| Error::connection_closed("event stream ended"))?;

            match serde_json::from_value::<RequestWillBeSentParams>(event.params) {
                Ok(params) if params.request.url.contains(url_fragment) => return Ok(params),
                Ok(_) => {}
                Err(e) => warn!("Malformed requestWillBeSent payload: {}", e),
            }
        }
    }

    /// Wait for the next response whose URL contains the fragment
    pub async fn expect_response(
        &self,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<ResponseReceivedParams> {
        self.ensure_open()?;
        let mut events = self
            .connection
            .subscribe("Network.responseReceived", Some(self.session.session_id()))
            .await?;
        self.enable_network().await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!(
                    "No response matching {:?} within {:?}",
                    url_fragment, timeout
                )));
            }

            let event = tokio::time::timeout(remaining, events.next_event())
                .await
                .map_err(|_| {
                    Error::timeout(format!(
                        "No response matching {:?} within {:?}",
                        url_fragment, timeout
                    ))
                })?
                .ok_or_else(|| Error::connection_closed("event stream ended"))?;

            match serde_json::from_value::<ResponseReceivedParams>(event.params) {
                Ok(params) if params.response.url.contains(url_fragment) => return Ok(params),
                Ok(_) => {}
                Err(e) => warn!("Malformed responseReceived payload: {}", e),
            }
        }
    }

    async fn enable_network(&self) -> Result<()> {
        if self.network_enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session_command(self.session.session_id(), "Network.enable", None)
            .await?;
        Ok(())
    }

    /// Pause requests matching the URL patterns for inspection or
    /// rewriting
    pub async fn intercept(
        &self,
        url_patterns: &[&str],
        stage: RequestStage,
    ) -> Result<FetchInterception> {
        self.ensure_open()?;
        let events = self
            .connection
            .subscribe("Fetch.requestPaused", Some(self.session.session_id()))
            .await?;

        let patterns: Vec<_> = url_patterns
            .iter()
            .map(|url_pattern| intercept::pattern(url_pattern, stage))
            .collect();

        // Suspend the pump's pass-through before the browser can pause
        // anything, or an early pause would be answered twice.
        self.user_intercept.store(true, Ordering::SeqCst);
        let enabled = self
            .session_command(
                self.session.session_id(),
                "Fetch.enable",
                Some(serde_json::json!({
                    "patterns": serde_json::to_value(patterns)?,
                    "handleAuthRequests": self.config.has_proxy_credentials(),
                })),
            )
            .await;
        if let Err(e) = enabled {
            self.user_intercept.store(false, Ordering::SeqCst);
            return Err(e);
        }

        Ok(FetchInterception::new(
            Arc::clone(&self.connection),
            self.session.session_id().to_string(),
            events,
            Arc::clone(&self.user_intercept),
        ))
    }

    // -----------------------------------------------------------------
    // Lifecycle

    /// Detach and close the tab; calling twice is a no-op
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state_tx.send_replace(TabState::Closed);
        info!("Closing tab {}", self.target_id);

        if self.session.is_alive() {
            if let Err(e) = self.registry.detach(&self.session).await {
                debug!("Detach during close failed: {}", e);
            }
        }

        // The target may already be gone; that is fine for close.
        if let Err(e) = self
            .connection
            .send_command(
                None,
                "Target.closeTarget",
                Some(serde_json::json!({ "targetId": self.target_id })),
            )
            .await
        {
            debug!("closeTarget during close failed: {}", e);
        }
        Ok(())
    }

    /// Local handle id of this tab
    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn state(&self) -> TabState {
        *self.state_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::stale_session(format!(
                "tab {} is closed",
                self.target_id
            )));
        }
        Ok(())
    }

    /// Send a raw protocol command on this tab's session
    pub async fn command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.session_command(self.session.session_id(), method, params)
            .await
    }

    /// Send a command on a specific session, failing fast when the
    /// session or tab is gone
    pub(crate) async fn session_command(
        &self,
        session_id: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.ensure_open()?;
        if session_id == self.session.session_id() {
            self.session.ensure_alive()?;
        } else if let Ok(session) = self.registry.resolve(session_id) {
            session.ensure_alive()?;
        }
        self.connection
            .send_command(Some(session_id), method, params)
            .await
    }

    /// Evaluate in the main frame regardless of the current frame
    async fn root_evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        self.ensure_open()?;
        let params = EvaluateParams {
            expression: expression.to_string(),
            await_promise: Some(true),
            return_by_value: Some(true),
            context_id: None,
        };
        let result = self
            .session_command(
                self.session.session_id(),
                "Runtime.evaluate",
                Some(serde_json::to_value(params)?),
            )
            .await?;
        let response: EvaluateResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid evaluate response: {}", e)))?;
        if let Some(details) = response.exception_details {
            return Err(Error::script_execution_failed(details.message()));
        }
        Ok(response.result.value.unwrap_or(serde_json::Value::Null))
    }

    /// Session and context scoping for the current frame
    pub(crate) fn command_scope(&self) -> Result<CommandScope> {
        let frame = self.frames.current()?;

        if let Some(session_id) = &frame.session_id {
            return Ok(CommandScope {
                session_id: session_id.clone(),
                context_id: None,
                frame_id: frame.frame_id,
            });
        }

        let context_id = if frame.is_root() {
            None
        } else {
            match frame.execution_context_id {
                Some(id) => Some(id),
                None => {
                    return Err(Error::frame_not_found(format!(
                        "frame {} has no execution context yet",
                        frame.frame_id
                    )))
                }
            }
        };

        Ok(CommandScope {
            session_id: self.session.session_id().to_string(),
            context_id,
            frame_id: frame.frame_id,
        })
    }

    pub(crate) fn frame_tree(&self) -> &FrameTree {
        &self.frames
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Strong handle to this tab, for element handles that outlive the
    /// current call
    pub(crate) fn shared(&self) -> Result<Arc<Tab>> {
        self.self_weak
            .upgrade()
            .ok_or_else(|| Error::internal("tab was dropped"))
    }
}

impl std::fmt::Debug for Tab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tab")
            .field("tab_id", &self.tab_id)
            .field("target_id", &self.target_id)
            .field("session_id", &self.session.session_id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpConnection;

    async fn attached_tab(config: Config) -> (Arc<MockCdpConnection>, Arc<Tab>) {
        let conn = Arc::new(MockCdpConnection::new());
        let registry = SessionRegistry::new(conn.clone() as Arc<dyn CdpConnection>);
        let tab = Tab::attach(
            conn.clone() as Arc<dyn CdpConnection>,
            registry,
            config,
            "T1",
        )
        .await
        .unwrap();
        (conn, tab)
    }

    #[tokio::test]
    async fn test_attach_enables_domains() {
        let (conn, tab) = attached_tab(Config::default()).await;

        assert_eq!(tab.session_id(), "MOCK-SESSION-1");
        assert_eq!(tab.state(), TabState::Created);

        let methods: Vec<String> = conn.calls().await.into_iter().map(|c| c.method).collect();
        assert!(methods.contains(&"Page.enable".to_string()));
        assert!(methods.contains(&"Runtime.enable".to_string()));
        assert!(methods.contains(&"DOM.enable".to_string()));
        assert!(methods.contains(&"Target.setAutoAttach".to_string()));
        assert!(methods.contains(&"Page.getFrameTree".to_string()));
        // No proxy credentials, no Fetch.enable.
        assert!(!methods.contains(&"Fetch.enable".to_string()));
    }

    #[tokio::test]
    async fn test_navigate_waits_for_load() {
        let (conn, tab) = attached_tab(Config::default()).await;

        let nav_tab = Arc::clone(&tab);
        let nav = tokio::spawn(async move { nav_tab.navigate("https://example.com").await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tab.state(), TabState::Navigating);

        conn.emit_method(
            "Page.loadEventFired",
            serde_json::json!({ "timestamp": 1.0 }),
            Some("MOCK-SESSION-1"),
        )
        .await;

        nav.await.unwrap().unwrap();
        assert_eq!(tab.state(), TabState::Loaded);
    }

    #[tokio::test]
    async fn test_navigate_reports_browser_failure() {
        let (conn, tab) = attached_tab(Config::default()).await;
        conn.enqueue_response(
            "Page.navigate",
            serde_json::json!({
                "frameId": "MOCK-FRAME-1",
                "errorText": "net::ERR_NAME_NOT_RESOLVED",
            }),
        )
        .await;

        let err = tab.navigate("https://nope.invalid").await.unwrap_err();
        assert!(matches!(err, Error::NavigationFailed(_)));
    }

    #[tokio::test]
    async fn test_newer_navigation_supersedes_older_wait() {
        let (conn, tab) = attached_tab(Config::default()).await;

        let first_tab = Arc::clone(&tab);
        let first = tokio::spawn(async move {
            first_tab
                .navigate_with_timeout("https://example.com/first", Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second_tab = Arc::clone(&tab);
        let second = tokio::spawn(async move {
            second_tab
                .navigate_with_timeout("https://example.com/second", Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        conn.emit_method(
            "Page.loadEventFired",
            serde_json::json!({ "timestamp": 2.0 }),
            Some("MOCK-SESSION-1"),
        )
        .await;

        let first_result = first.await.unwrap();
        assert!(matches!(
            first_result,
            Err(Error::NavigationSuperseded(_))
        ));
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_navigate_times_out_without_load_event() {
        let (_conn, tab) = attached_tab(Config::default()).await;

        let err = tab
            .navigate_with_timeout("https://example.com", Duration::from_millis(80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_evaluate_returns_value() {
        let (conn, tab) = attached_tab(Config::default()).await;
        conn.enqueue_response(
            "Runtime.evaluate",
            serde_json::json!({
                "result": { "type": "number", "value": 4 }
            }),
        )
        .await;

        let value = tab.evaluate("2 + 2").await.unwrap();
        assert_eq!(value, serde_json::json!(4));
    }

    #[tokio::test]
    async fn test_evaluate_surfaces_js_exception() {
        let (conn, tab) = attached_tab(Config::default()).await;
        conn.enqueue_response(
            "Runtime.evaluate",
            serde_json::json!({
                "result": { "type": "object", "subtype": "error" },
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "lineNumber": 0,
                    "columnNumber": 0,
                    "exception": { "type": "object", "description": "ReferenceError: nope is not defined" }
                }
            }),
        )
        .await;

        let err = tab.evaluate("nope()").await.unwrap_err();
        match err {
            Error::ScriptExecutionFailed(message) => {
                assert!(message.contains("ReferenceError"));
            }
            other => panic!("Expected ScriptExecutionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_url_prefers_pushed_target_info() {
        let (conn, tab) = attached_tab(Config::default()).await;

        conn.emit_method(
            "Target.targetInfoChanged",
            serde_json::json!({
                "targetInfo": {
                    "targetId": "T1",
                    "type": "page",
                    "title": "Example",
                    "url": "https://example.com/",
                    "attached": true,
                }
            }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(tab.url().await.unwrap(), "https://example.com/");
        assert_eq!(tab.title().await.unwrap(), "Example");
        // No script evaluation was needed for either read.
        assert!(conn.calls_for("Runtime.evaluate").await.is_empty());
    }

    #[tokio::test]
    async fn test_frame_events_update_tree() {
        let (conn, tab) = attached_tab(Config::default()).await;

        conn.emit_method(
            "Page.frameAttached",
            serde_json::json!({ "frameId": "CHILD", "parentFrameId": "MOCK-FRAME-1" }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = tab.frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].frame_id, "CHILD");

        conn.emit_method(
            "Page.frameDetached",
            serde_json::json!({ "frameId": "CHILD" }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tab.frames().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_lazily_attaches_cross_origin_frame() {
        let conn = Arc::new(MockCdpConnection::new());
        let registry = SessionRegistry::new(conn.clone() as Arc<dyn CdpConnection>);
        let tab = Tab::attach(
            conn.clone() as Arc<dyn CdpConnection>,
            Arc::clone(&registry),
            Config::default(),
            "T1",
        )
        .await
        .unwrap();

        // A child frame with neither a session nor an execution
        // context, the shape an out-of-process iframe arrives in.
        conn.emit_method(
            "Page.frameAttached",
            serde_json::json!({ "frameId": "OOPIF-1", "parentFrameId": "MOCK-FRAME-1" }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.enqueue_response(
            "Target.getTargets",
            serde_json::json!({
                "targetInfos": [{
                    "targetId": "OOPIF-1",
                    "type": "iframe",
                    "title": "",
                    "url": "https://ads.example/frame",
                    "attached": false,
                }]
            }),
        )
        .await;
        conn.enqueue_response(
            "Target.attachToTarget",
            serde_json::json!({ "sessionId": "MOCK-SESSION-2" }),
        )
        .await;

        tab.switch_to(FrameTarget::Id("OOPIF-1".to_string()))
            .await
            .unwrap();

        let current = tab.current_frame().unwrap();
        assert_eq!(current.frame_id, "OOPIF-1");
        assert_eq!(current.session_id.as_deref(), Some("MOCK-SESSION-2"));

        // One attach for the tab itself, one for the frame, recorded
        // under the tab's session as its parent.
        let attaches = conn.calls_for("Target.attachToTarget").await;
        assert_eq!(attaches.len(), 2);
        assert_eq!(attaches[1].params.as_ref().unwrap()["targetId"], "OOPIF-1");
        let frame_session = registry.resolve("MOCK-SESSION-2").unwrap();
        assert_eq!(frame_session.parent_session_id(), Some("MOCK-SESSION-1"));

        // Switching away and back rides the session cached on the
        // frame entry instead of attaching again.
        tab.switch_to(FrameTarget::Root).await.unwrap();
        tab.switch_to(FrameTarget::Id("OOPIF-1".to_string()))
            .await
            .unwrap();
        assert_eq!(conn.calls_for("Target.attachToTarget").await.len(), 2);
        assert_eq!(conn.calls_for("Target.getTargets").await.len(), 1);
    }

    #[tokio::test]
    async fn test_switch_reuses_auto_attached_frame_session() {
        let (conn, tab) = attached_tab(Config::default()).await;

        conn.emit_method(
            "Page.frameAttached",
            serde_json::json!({ "frameId": "OOPIF-2", "parentFrameId": "MOCK-FRAME-1" }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        conn.emit_method(
            "Target.attachedToTarget",
            serde_json::json!({
                "sessionId": "MOCK-SESSION-3",
                "targetInfo": {
                    "targetId": "OOPIF-2",
                    "type": "iframe",
                    "title": "",
                    "url": "https://ads.example/frame",
                    "attached": true,
                },
                "waitingForDebugger": false,
            }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        tab.switch_to(FrameTarget::Id("OOPIF-2".to_string()))
            .await
            .unwrap();

        let current = tab.current_frame().unwrap();
        assert_eq!(current.session_id.as_deref(), Some("MOCK-SESSION-3"));
        // The session auto-attach already produced was reused; no
        // target enumeration or second attach went out.
        assert!(conn.calls_for("Target.getTargets").await.is_empty());
        assert_eq!(conn.calls_for("Target.attachToTarget").await.len(), 1);
    }

    #[tokio::test]
    async fn test_proxy_auth_answered_once() {
        let mut config = Config::default();
        config.proxy_server = Some("http://proxy:8080".to_string());
        config.proxy_username = Some("user".to_string());
        config.proxy_password = Some("secret".to_string());
        let (conn, _tab) = attached_tab(config).await;

        let challenge = serde_json::json!({
            "requestId": "REQ-7",
            "request": { "url": "https://example.com", "method": "GET", "headers": {} },
            "authChallenge": { "source": "Proxy", "origin": "http://proxy:8080", "scheme": "basic", "realm": "" },
        });
        conn.emit_method("Fetch.authRequired", challenge.clone(), Some("MOCK-SESSION-1"))
            .await;
        conn.emit_method("Fetch.authRequired", challenge, Some("MOCK-SESSION-1"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = conn.calls_for("Fetch.continueWithAuth").await;
        assert_eq!(calls.len(), 1);
        let params = calls[0].params.as_ref().unwrap();
        assert_eq!(params["requestId"], "REQ-7");
        assert_eq!(
            params["authChallengeResponse"]["response"],
            "ProvideCredentials"
        );
        assert_eq!(params["authChallengeResponse"]["username"], "user");
    }

    #[tokio::test]
    async fn test_paused_requests_pass_through() {
        let mut config = Config::default();
        config.proxy_server = Some("http://proxy:8080".to_string());
        config.proxy_username = Some("user".to_string());
        config.proxy_password = Some("secret".to_string());
        let (conn, _tab) = attached_tab(config).await;

        conn.emit_method(
            "Fetch.requestPaused",
            serde_json::json!({
                "requestId": "REQ-9",
                "request": { "url": "https://example.com", "method": "GET", "headers": {} },
                "frameId": "MOCK-FRAME-1",
                "resourceType": "Document",
            }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = conn.calls_for("Fetch.continueRequest").await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params.as_ref().unwrap()["requestId"], "REQ-9");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, tab) = attached_tab(Config::default()).await;

        tab.close().await.unwrap();
        tab.close().await.unwrap();
        assert_eq!(tab.state(), TabState::Closed);

        let calls = conn.calls_for("Target.closeTarget").await;
        assert_eq!(calls.len(), 1);

        let err = tab.evaluate("1").await.unwrap_err();
        assert!(matches!(err, Error::StaleSession(_)));
    }

    #[tokio::test]
    async fn test_screenshot_decodes_base64() {
        let (_conn, tab) = attached_tab(Config::default()).await;

        let bytes = tab.screenshot(ScreenshotFormat::Png).await.unwrap();
        // The mock's canned payload is a real 1x1 PNG.
        assert_eq!(&bytes[0..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
    }

    #[tokio::test]
    async fn test_ready_state_ordering() {
        assert!(ReadyState::Loading < ReadyState::Interactive);
        assert!(ReadyState::Interactive < ReadyState::Complete);
        assert_eq!(ReadyState::parse("complete"), Some(ReadyState::Complete));
        assert_eq!(ReadyState::parse("bogus"), None);
    }
}
