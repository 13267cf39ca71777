//! Element handles
//!
//! An `Element` pins a DOM node inside a specific frame document. The
//! handle records the frame's navigation count at resolution time; once
//! the frame navigates again every operation fails with a stale element
//! error instead of touching the wrong document.

use super::keys::{self, SpecialKey};
use super::tab::{CommandScope, Tab};
use crate::cdp::types::{
    DescribeNodeResponse, DispatchMouseEventParams, EvaluateParams, EvaluateResponse,
    GetAttributesResponse, GetBoxModelResponse, GetDocumentResponse, GetOuterHtmlResponse,
    GetSearchResultsResponse, Node, PerformSearchResponse, QuerySelectorAllResponse,
    QuerySelectorResponse, RemoteObject, RequestNodeResponse, ResolveNodeResponse,
};
use crate::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Identifiers for one node, filled in lazily as commands need them
#[derive(Debug, Clone, Default)]
pub(crate) struct ElementIds {
    pub object_id: Option<String>,
    pub node_id: Option<i64>,
}

/// Handle to a DOM element inside a specific frame document
pub struct Element {
    tab: Arc<Tab>,
    frame_id: String,
    session_id: String,
    /// Frame navigation count at resolution time
    nav_mark: u64,
    ids: Mutex<ElementIds>,
    /// Outer None means not yet resolved; inner None is a real
    /// "no parent" answer
    parent: Mutex<Option<Option<Arc<Element>>>>,
    children: Mutex<Option<Vec<Arc<Element>>>>,
}

impl Element {
    fn new(
        tab: Arc<Tab>,
        frame_id: String,
        session_id: String,
        nav_mark: u64,
        ids: ElementIds,
    ) -> Arc<Self> {
        Arc::new(Self {
            tab,
            frame_id,
            session_id,
            nav_mark,
            ids: Mutex::new(ids),
            parent: Mutex::new(None),
            children: Mutex::new(None),
        })
    }

    /// New handle in the same frame, sharing this one's liveness mark
    fn derive(&self, ids: ElementIds) -> Arc<Element> {
        Element::new(
            Arc::clone(&self.tab),
            self.frame_id.clone(),
            self.session_id.clone(),
            self.nav_mark,
            ids,
        )
    }

    /// Frame this element was resolved in
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    fn ensure_fresh(&self) -> Result<()> {
        match self.tab.frame_tree().nav_count(&self.frame_id) {
            Some(count) if count == self.nav_mark => Ok(()),
            Some(_) => Err(Error::stale_element(
                "frame navigated since the element was resolved",
            )),
            None => Err(Error::stale_element("frame is gone")),
        }
    }

    async fn command(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        self.ensure_fresh()?;
        self.tab
            .session_command(&self.session_id, method, Some(params))
            .await
            .map_err(map_node_error)
    }

    fn ids(&self) -> Result<ElementIds> {
        Ok(self
            .ids
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .clone())
    }

    fn with_ids<F: FnOnce(&mut ElementIds)>(&self, f: F) -> Result<()> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
        f(&mut ids);
        Ok(())
    }

    /// The DOM node id, importing the JS object into the node space if
    /// this handle started from one
    async fn node_id(&self) -> Result<i64> {
        let ids = self.ids()?;
        if let Some(node_id) = ids.node_id {
            return Ok(node_id);
        }
        let object_id = match ids.object_id {
            Some(object_id) => object_id,
            None => return Err(Error::internal("element handle has no identifiers")),
        };

        let result = self
            .command("DOM.requestNode", serde_json::json!({ "objectId": object_id }))
            .await?;
        let response: RequestNodeResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid requestNode response: {}", e)))?;
        self.with_ids(|ids| ids.node_id = Some(response.node_id))?;
        Ok(response.node_id)
    }

    /// The JS object id, resolving the node if this handle started from
    /// a node id
    async fn object_id(&self) -> Result<String> {
        let ids = self.ids()?;
        if let Some(object_id) = ids.object_id {
            return Ok(object_id);
        }
        let node_id = match ids.node_id {
            Some(node_id) => node_id,
            None => return Err(Error::internal("element handle has no identifiers")),
        };

        let result = self
            .command("DOM.resolveNode", serde_json::json!({ "nodeId": node_id }))
            .await?;
        let response: ResolveNodeResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid resolveNode response: {}", e)))?;
        let object_id = response
            .object
            .object_id
            .ok_or_else(|| Error::decode("resolveNode returned no object id"))?;
        self.with_ids(|ids| ids.object_id = Some(object_id.clone()))?;
        Ok(object_id)
    }

    async fn describe(&self) -> Result<Node> {
        let ids = self.ids()?;
        let params = if let Some(node_id) = ids.node_id {
            serde_json::json!({ "nodeId": node_id })
        } else if let Some(object_id) = ids.object_id {
            serde_json::json!({ "objectId": object_id })
        } else {
            return Err(Error::internal("element handle has no identifiers"));
        };

        let result = self.command("DOM.describeNode", params).await?;
        let response: DescribeNodeResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid describeNode response: {}", e)))?;
        Ok(response.node)
    }

    // -----------------------------------------------------------------
    // Reading

    /// Lowercase tag name
    pub async fn tag_name(&self) -> Result<String> {
        let node = self.describe().await?;
        if !node.local_name.is_empty() {
            return Ok(node.local_name);
        }
        Ok(node.node_name.to_lowercase())
    }

    /// Rendered text of the element
    pub async fn text(&self) -> Result<String> {
        let value = self
            .call_function("function() { return this.innerText || this.textContent || ''; }")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Serialized HTML including the element itself
    pub async fn outer_html(&self) -> Result<String> {
        let node_id = self.node_id().await?;
        let result = self
            .command("DOM.getOuterHTML", serde_json::json!({ "nodeId": node_id }))
            .await?;
        let response: GetOuterHtmlResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getOuterHTML response: {}", e)))?;
        Ok(response.outer_html)
    }

    /// Attribute value, or None when the attribute is absent
    pub async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let node_id = self.node_id().await?;
        let result = self
            .command("DOM.getAttributes", serde_json::json!({ "nodeId": node_id }))
            .await?;
        let response: GetAttributesResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getAttributes response: {}", e)))?;
        Ok(response
            .attributes
            .chunks_exact(2)
            .find(|pair| pair[0] == name)
            .map(|pair| pair[1].clone()))
    }

    /// Set an attribute on the element
    pub async fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        let node_id = self.node_id().await?;
        self.command(
            "DOM.setAttributeValue",
            serde_json::json!({ "nodeId": node_id, "name": name, "value": value }),
        )
        .await?;
        Ok(())
    }

    /// JS property value on the element
    pub async fn property(&self, name: &str) -> Result<serde_json::Value> {
        // JSON-encode the name so arbitrary strings stay safe inside
        // the function body.
        let name_json = serde_json::to_string(name)?;
        let declaration = format!("function() {{ return this[{}]; }}", name_json);
        self.call_function(&declaration).await
    }

    /// Whether the element takes up layout space
    pub async fn is_visible(&self) -> Result<bool> {
        let value = self
            .call_function(
                "function() { const rects = this.getClientRects(); \
                 return rects.length > 0 && (this.offsetWidth > 0 || this.offsetHeight > 0); }",
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    // -----------------------------------------------------------------
    // Interaction

    /// Scroll into view and click the center of the element's box
    pub async fn click(&self) -> Result<()> {
        self.scroll_into_view().await?;
        let (x, y) = self.clickable_point().await?;

        let press = DispatchMouseEventParams {
            event_type: "mousePressed".to_string(),
            x,
            y,
            button: Some("left".to_string()),
            click_count: Some(1),
            modifiers: None,
        };
        let mut release = press.clone();
        release.event_type = "mouseReleased".to_string();

        self.command("Input.dispatchMouseEvent", serde_json::to_value(press)?)
            .await?;
        self.command("Input.dispatchMouseEvent", serde_json::to_value(release)?)
            .await?;
        Ok(())
    }

    async fn scroll_into_view(&self) -> Result<()> {
        let node_id = self.node_id().await?;
        // Some targets lack scrollIntoViewIfNeeded; fall back to JS.
        if self
            .command(
                "DOM.scrollIntoViewIfNeeded",
                serde_json::json!({ "nodeId": node_id }),
            )
            .await
            .is_err()
        {
            self.call_function(
                "function() { this.scrollIntoView({ block: 'center', inline: 'center' }); }",
            )
            .await?;
        }
        Ok(())
    }

    async fn clickable_point(&self) -> Result<(f64, f64)> {
        let node_id = self.node_id().await?;
        let result = self
            .command("DOM.getBoxModel", serde_json::json!({ "nodeId": node_id }))
            .await?;
        let response: GetBoxModelResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getBoxModel response: {}", e)))?;
        response
            .model
            .content_center()
            .ok_or_else(|| Error::element_not_found("element has no visible box to click"))
    }

    /// Focus the element
    pub async fn focus(&self) -> Result<()> {
        let node_id = self.node_id().await?;
        self.command("DOM.focus", serde_json::json!({ "nodeId": node_id }))
            .await?;
        Ok(())
    }

    /// Focus and type text through key events
    pub async fn send_keys(&self, text: &str) -> Result<()> {
        self.focus().await?;
        for event in keys::text_events(text) {
            self.command("Input.dispatchKeyEvent", serde_json::to_value(event)?)
                .await?;
        }
        Ok(())
    }

    /// Focus and press a named key with optional modifier flags
    pub async fn press(&self, key: SpecialKey, modifiers: i64) -> Result<()> {
        self.focus().await?;
        for event in key.to_events(modifiers) {
            self.command("Input.dispatchKeyEvent", serde_json::to_value(event)?)
                .await?;
        }
        Ok(())
    }

    /// Focus and send a character with modifiers held, e.g. Ctrl+A
    pub async fn press_combo(&self, ch: char, modifiers: i64) -> Result<()> {
        self.focus().await?;
        for event in keys::combo_events(ch, modifiers) {
            self.command("Input.dispatchKeyEvent", serde_json::to_value(event)?)
                .await?;
        }
        Ok(())
    }

    /// Empty the element's value
    ///
    /// Select-all plus Backspace first, so the page sees ordinary key
    /// input; controls that ignore keys get a JS value reset instead.
    pub async fn clear(&self) -> Result<()> {
        self.press_combo('a', keys::modifiers::CTRL).await?;
        self.press(SpecialKey::Backspace, keys::modifiers::NONE)
            .await?;

        let value = self
            .call_function(
                "function() { \
                    if ('value' in this) { return String(this.value); } \
                    return this.isContentEditable ? (this.textContent || '') : ''; \
                }",
            )
            .await?;
        if value.as_str().map_or(false, |v| !v.is_empty()) {
            self.call_function(
                "function() { \
                    if ('value' in this) { this.value = ''; } \
                    else if (this.isContentEditable) { this.textContent = ''; } \
                    this.dispatchEvent(new Event('input', { bubbles: true })); \
                    this.dispatchEvent(new Event('change', { bubbles: true })); \
                }",
            )
            .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Traversal

    /// Poll for the first descendant matching the selector
    pub async fn find(&self, selector: &str) -> Result<Arc<Element>> {
        find(
            &self.tab,
            Some(self),
            selector,
            self.tab.config().command_timeout(),
        )
        .await
    }

    /// Poll for descendants matching the selector; the returned set is
    /// the final query's matches
    pub async fn find_all(&self, selector: &str) -> Result<Vec<Arc<Element>>> {
        find_all(
            &self.tab,
            Some(self),
            selector,
            self.tab.config().command_timeout(),
        )
        .await
    }

    /// Parent element, resolved once and cached; None at the document
    /// root
    pub async fn parent(&self) -> Result<Option<Arc<Element>>> {
        self.ensure_fresh()?;
        {
            let cache = self
                .parent
                .lock()
                .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
            if let Some(parent) = cache.as_ref() {
                return Ok(parent.clone());
            }
        }

        let object = self
            .call_function_object("function() { return this.parentElement; }", false)
            .await?;
        let parent = object.object_id.map(|object_id| {
            self.derive(ElementIds {
                object_id: Some(object_id),
                ..Default::default()
            })
        });

        let mut cache = self
            .parent
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
        *cache = Some(parent.clone());
        Ok(parent)
    }

    /// Direct children, fetched once and cached on the handle
    pub async fn children(&self) -> Result<Vec<Arc<Element>>> {
        self.ensure_fresh()?;
        {
            let cache = self
                .children
                .lock()
                .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
            if let Some(children) = cache.as_ref() {
                return Ok(children.clone());
            }
        }

        let node_id = self.node_id().await?;
        let result = self
            .command(
                "DOM.querySelectorAll",
                serde_json::json!({ "nodeId": node_id, "selector": ":scope > *" }),
            )
            .await?;
        let response: QuerySelectorAllResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid querySelectorAll response: {}", e)))?;

        let children: Vec<Arc<Element>> = response
            .node_ids
            .into_iter()
            .filter(|id| *id != 0)
            .map(|node_id| {
                self.derive(ElementIds {
                    node_id: Some(node_id),
                    ..Default::default()
                })
            })
            .collect();

        let mut cache = self
            .children
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
        *cache = Some(children.clone());
        Ok(children)
    }

    /// Call a JS function with the element bound to `this`
    pub async fn call_function(&self, declaration: &str) -> Result<serde_json::Value> {
        let object = self.call_function_object(declaration, true).await?;
        Ok(object.value.unwrap_or(serde_json::Value::Null))
    }

    async fn call_function_object(
        &self,
        declaration: &str,
        by_value: bool,
    ) -> Result<RemoteObject> {
        let object_id = self.object_id().await?;
        let params = serde_json::json!({
            "functionDeclaration": declaration,
            "objectId": object_id,
            "returnByValue": by_value,
            "awaitPromise": true,
        });

        let result = self.command("Runtime.callFunctionOn", params).await?;
        let response: EvaluateResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid callFunctionOn response: {}", e)))?;
        if let Some(details) = response.exception_details {
            return Err(Error::script_execution_failed(details.message()));
        }
        Ok(response.result)
    }

    /// Frame id of the document hosted by this element, for iframes
    pub(crate) async fn content_frame_id(&self) -> Result<String> {
        let node = self.describe().await?;
        node.frame_id
            .ok_or_else(|| Error::frame_not_found("element does not host a frame"))
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = self.ids.lock().map(|g| g.clone()).unwrap_or_default();
        f.debug_struct("Element")
            .field("frame_id", &self.frame_id)
            .field("node_id", &ids.node_id)
            .field("object_id", &ids.object_id)
            .finish()
    }
}

/// The generic server error on node commands means the node is gone or
/// never belonged to this document
fn map_node_error(error: Error) -> Error {
    match error {
        Error::Protocol {
            code: -32000,
            message,
            ..
        } if message.contains("node with given id") => Error::stale_element(message),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Frame-scoped queries

/// Poll for the first match under the tab's current frame, or under an
/// element when `within` is set
pub(crate) async fn find(
    tab: &Tab,
    within: Option<&Element>,
    selector: &str,
    timeout: Duration,
) -> Result<Arc<Element>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match query_first(tab, within, selector).await {
            Ok(Some(element)) => return Ok(element),
            Ok(None) => {}
            // Mid-navigation the document or context can briefly be
            // unavailable; keep polling until the deadline.
            Err(Error::Protocol { .. }) | Err(Error::FrameNotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::element_not_found(format!(
                "no element matches {:?} after {:?}",
                selector, timeout
            )));
        }
        tokio::time::sleep(tab.config().poll_interval().min(remaining)).await;
    }
}

/// Poll until at least one element matches, then return every match
/// from that final query
pub(crate) async fn find_all(
    tab: &Tab,
    within: Option<&Element>,
    selector: &str,
    timeout: Duration,
) -> Result<Vec<Arc<Element>>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match query_all(tab, within, selector).await {
            Ok(elements) if !elements.is_empty() => return Ok(elements),
            Ok(_) => {}
            // Mid-navigation the document or context can briefly be
            // unavailable; keep polling until the deadline.
            Err(Error::Protocol { .. }) | Err(Error::FrameNotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::element_not_found(format!(
                "no element matches {:?} after {:?}",
                selector, timeout
            )));
        }
        tokio::time::sleep(tab.config().poll_interval().min(remaining)).await;
    }
}

async fn query_all(
    tab: &Tab,
    within: Option<&Element>,
    selector: &str,
) -> Result<Vec<Arc<Element>>> {
    let (session_id, frame_id, root) = query_root(tab, within).await?;
    let result = tab
        .session_command(
            &session_id,
            "DOM.querySelectorAll",
            Some(serde_json::json!({ "nodeId": root, "selector": selector })),
        )
        .await?;
    let response: QuerySelectorAllResponse = serde_json::from_value(result)
        .map_err(|e| Error::decode(format!("Invalid querySelectorAll response: {}", e)))?;

    let nav_mark = tab.frame_tree().nav_count(&frame_id).unwrap_or(0);
    let tab_arc = tab.shared()?;
    Ok(response
        .node_ids
        .into_iter()
        .filter(|id| *id != 0)
        .map(|node_id| {
            Element::new(
                Arc::clone(&tab_arc),
                frame_id.clone(),
                session_id.clone(),
                nav_mark,
                ElementIds {
                    node_id: Some(node_id),
                    ..Default::default()
                },
            )
        })
        .collect())
}

async fn query_first(
    tab: &Tab,
    within: Option<&Element>,
    selector: &str,
) -> Result<Option<Arc<Element>>> {
    let (session_id, frame_id, root) = query_root(tab, within).await?;
    let result = tab
        .session_command(
            &session_id,
            "DOM.querySelector",
            Some(serde_json::json!({ "nodeId": root, "selector": selector })),
        )
        .await?;
    let response: QuerySelectorResponse = serde_json::from_value(result)
        .map_err(|e| Error::decode(format!("Invalid querySelector response: {}", e)))?;

    // Node id zero means no match.
    if response.node_id == 0 {
        return Ok(None);
    }

    let nav_mark = tab.frame_tree().nav_count(&frame_id).unwrap_or(0);
    Ok(Some(Element::new(
        tab.shared()?,
        frame_id,
        session_id,
        nav_mark,
        ElementIds {
            node_id: Some(response.node_id),
            ..Default::default()
        },
    )))
}

/// Session, frame, and root node a query should run against
async fn query_root(tab: &Tab, within: Option<&Element>) -> Result<(String, String, i64)> {
    match within {
        Some(element) => {
            element.ensure_fresh()?;
            Ok((
                element.session_id.clone(),
                element.frame_id.clone(),
                element.node_id().await?,
            ))
        }
        None => {
            let scope = tab.command_scope()?;
            let root = frame_document_node(tab, &scope).await?;
            Ok((scope.session_id, scope.frame_id, root))
        }
    }
}

/// Node id of the document backing the scope's frame
pub(crate) async fn frame_document_node(tab: &Tab, scope: &CommandScope) -> Result<i64> {
    match scope.context_id {
        // The root frame, or a frame served by its own session: the
        // session document is the frame document.
        None => {
            let result = tab
                .session_command(
                    &scope.session_id,
                    "DOM.getDocument",
                    Some(serde_json::json!({ "depth": 0 })),
                )
                .await?;
            let response: GetDocumentResponse = serde_json::from_value(result)
                .map_err(|e| Error::decode(format!("Invalid getDocument response: {}", e)))?;
            Ok(response.root.node_id)
        }
        // Same-process subframe: resolve its document object in the
        // frame's execution context and import it into the node space.
        Some(context_id) => {
            let params = EvaluateParams {
                expression: "document".to_string(),
                await_promise: Some(false),
                return_by_value: Some(false),
                context_id: Some(context_id),
            };
            let result = tab
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
            let object_id = response
                .result
                .object_id
                .ok_or_else(|| Error::decode("document did not resolve to an object"))?;

            let result = tab
                .session_command(
                    &scope.session_id,
                    "DOM.requestNode",
                    Some(serde_json::json!({ "objectId": object_id })),
                )
                .await?;
            let response: RequestNodeResponse = serde_json::from_value(result)
                .map_err(|e| Error::decode(format!("Invalid requestNode response: {}", e)))?;
            Ok(response.node_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Text search

/// Poll for the first element whose text or markup matches the query
pub(crate) async fn find_by_text(
    tab: &Tab,
    text: &str,
    timeout: Duration,
) -> Result<Arc<Element>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match search_once(tab, text).await {
            Ok(Some(element)) => return Ok(element),
            Ok(None) => {}
            Err(Error::Protocol { .. }) | Err(Error::FrameNotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::element_not_found(format!(
                "no element matching text {:?} after {:?}",
                text, timeout
            )));
        }
        tokio::time::sleep(tab.config().poll_interval().min(remaining)).await;
    }
}

async fn search_once(tab: &Tab, text: &str) -> Result<Option<Arc<Element>>> {
    let scope = tab.command_scope()?;
    // The search API needs the document known to the DOM agent first.
    frame_document_node(tab, &scope).await?;

    let result = tab
        .session_command(
            &scope.session_id,
            "DOM.performSearch",
            Some(serde_json::json!({ "query": text })),
        )
        .await?;
    let search: PerformSearchResponse = serde_json::from_value(result)
        .map_err(|e| Error::decode(format!("Invalid performSearch response: {}", e)))?;

    let hits = if search.result_count > 0 {
        let result = tab
            .session_command(
                &scope.session_id,
                "DOM.getSearchResults",
                Some(serde_json::json!({
                    "searchId": search.search_id,
                    "fromIndex": 0,
                    "toIndex": search.result_count,
                })),
            )
            .await?;
        serde_json::from_value::<GetSearchResultsResponse>(result)
            .map_err(|e| Error::decode(format!("Invalid getSearchResults response: {}", e)))?
            .node_ids
    } else {
        Vec::new()
    };

    // Best effort; the search id dies with the session anyway.
    let _ = tab
        .session_command(
            &scope.session_id,
            "DOM.discardSearchResults",
            Some(serde_json::json!({ "searchId": search.search_id })),
        )
        .await;

    let nav_mark = tab.frame_tree().nav_count(&scope.frame_id).unwrap_or(0);
    for node_id in hits {
        if node_id == 0 {
            continue;
        }
        if let Some(element) = element_from_hit(tab, &scope, node_id, nav_mark).await? {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Search hits can be text nodes; climb to the owning element
async fn element_from_hit(
    tab: &Tab,
    scope: &CommandScope,
    node_id: i64,
    nav_mark: u64,
) -> Result<Option<Arc<Element>>> {
    const ELEMENT_NODE: i64 = 1;
    const TEXT_NODE: i64 = 3;

    let tab_arc = tab.shared()?;
    let described = match tab
        .session_command(
            &scope.session_id,
            "DOM.describeNode",
            Some(serde_json::json!({ "nodeId": node_id })),
        )
        .await
    {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let node = match serde_json::from_value::<DescribeNodeResponse>(described) {
        Ok(response) => response.node,
        Err(_) => return Ok(None),
    };

    match node.node_type {
        ELEMENT_NODE => Ok(Some(Element::new(
            tab_arc,
            scope.frame_id.clone(),
            scope.session_id.clone(),
            nav_mark,
            ElementIds {
                node_id: Some(node_id),
                ..Default::default()
            },
        ))),
        TEXT_NODE => {
            let resolved = match tab
                .session_command(
                    &scope.session_id,
                    "DOM.resolveNode",
                    Some(serde_json::json!({ "nodeId": node_id })),
                )
                .await
            {
                Ok(value) => value,
                Err(_) => return Ok(None),
            };
            let object = match serde_json::from_value::<ResolveNodeResponse>(resolved) {
                Ok(response) => response.object,
                Err(_) => return Ok(None),
            };
            let object_id = match object.object_id {
                Some(object_id) => object_id,
                None => return Ok(None),
            };

            let result = match tab
                .session_command(
                    &scope.session_id,
                    "Runtime.callFunctionOn",
                    Some(serde_json::json!({
                        "functionDeclaration": "function() { return this.parentElement; }",
                        "objectId": object_id,
                        "returnByValue": false,
                    })),
                )
                .await
            {
                Ok(value) => value,
                Err(_) => return Ok(None),
            };
            let response: EvaluateResponse = match serde_json::from_value(result) {
                Ok(response) => response,
                Err(_) => return Ok(None),
            };

            Ok(response.result.object_id.map(|object_id| {
                Element::new(
                    tab_arc,
                    scope.frame_id.clone(),
                    scope.session_id.clone(),
                    nav_mark,
                    ElementIds {
                        object_id: Some(object_id),
                        ..Default::default()
                    },
                )
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockCdpConnection;
    use crate::cdp::registry::SessionRegistry;
    use crate::cdp::traits::CdpConnection;
    use crate::config::Config;

    async fn tab_with_mock() -> (Arc<MockCdpConnection>, Arc<Tab>) {
        let conn = Arc::new(MockCdpConnection::new());
        let registry = SessionRegistry::new(conn.clone() as Arc<dyn CdpConnection>);
        let tab = Tab::attach(
            conn.clone() as Arc<dyn CdpConnection>,
            registry,
            Config::default(),
            "T1",
        )
        .await
        .unwrap();
        (conn, tab)
    }

    async fn found_element(conn: &MockCdpConnection, tab: &Tab) -> Arc<Element> {
        conn.enqueue_response("DOM.querySelector", serde_json::json!({ "nodeId": 7 }))
            .await;
        tab.find_with_timeout("#thing", Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_returns_first_match() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;
        assert_eq!(element.frame_id(), "MOCK-FRAME-1");

        let queries = conn.calls_for("DOM.querySelector").await;
        assert_eq!(queries.len(), 1);
        let params = queries[0].params.as_ref().unwrap();
        assert_eq!(params["selector"], "#thing");
        assert_eq!(params["nodeId"], 1);
    }

    #[tokio::test]
    async fn test_find_times_out_when_nothing_matches() {
        let (_conn, tab) = tab_with_mock().await;
        // The mock's default answer reports no match.
        let err = tab
            .find_with_timeout(".missing", Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_all_polls_until_matches_appear() {
        let conn = Arc::new(MockCdpConnection::new());
        let registry = SessionRegistry::new(conn.clone() as Arc<dyn CdpConnection>);
        let config = Config {
            poll_interval: 25,
            ..Default::default()
        };
        let tab = Tab::attach(conn.clone() as Arc<dyn CdpConnection>, registry, config, "T1")
            .await
            .unwrap();

        conn.enqueue_response("DOM.querySelectorAll", serde_json::json!({ "nodeIds": [] }))
            .await;
        conn.enqueue_response(
            "DOM.querySelectorAll",
            serde_json::json!({ "nodeIds": [4, 5, 6] }),
        )
        .await;

        let found = tab.find_all("li").await.unwrap();
        assert_eq!(found.len(), 3);
        // The empty first answer did not end the search.
        assert_eq!(conn.calls_for("DOM.querySelectorAll").await.len(), 2);
    }

    #[tokio::test]
    async fn test_find_all_times_out_when_nothing_matches() {
        let (_conn, tab) = tab_with_mock().await;
        // The mock's default answer is an empty match list.
        let err = tab
            .find_all_with_timeout("li", Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound(_)));
    }

    #[tokio::test]
    async fn test_text_reads_rendered_text() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.resolveNode",
            serde_json::json!({ "object": { "type": "object", "objectId": "OBJ-7" } }),
        )
        .await;
        conn.enqueue_response(
            "Runtime.callFunctionOn",
            serde_json::json!({ "result": { "type": "string", "value": "hello" } }),
        )
        .await;

        assert_eq!(element.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_click_dispatches_press_and_release() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.getBoxModel",
            serde_json::json!({
                "model": {
                    "content": [10.0, 10.0, 30.0, 10.0, 30.0, 30.0, 10.0, 30.0],
                    "width": 20.0,
                    "height": 20.0,
                }
            }),
        )
        .await;

        element.click().await.unwrap();

        let events = conn.calls_for("Input.dispatchMouseEvent").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].params.as_ref().unwrap()["type"], "mousePressed");
        assert_eq!(events[1].params.as_ref().unwrap()["type"], "mouseReleased");
        assert_eq!(events[0].params.as_ref().unwrap()["x"], 20.0);
        assert_eq!(events[0].params.as_ref().unwrap()["y"], 20.0);
    }

    #[tokio::test]
    async fn test_send_keys_types_through_key_events() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        element.send_keys("Hi").await.unwrap();

        assert_eq!(conn.calls_for("DOM.focus").await.len(), 1);
        let events = conn.calls_for("Input.dispatchKeyEvent").await;
        // 'H' needs a shift wrap (4 events), 'i' does not (2 events).
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].params.as_ref().unwrap()["key"], "Shift");
    }

    #[tokio::test]
    async fn test_clear_uses_select_all_and_backspace() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.resolveNode",
            serde_json::json!({ "object": { "type": "object", "objectId": "OBJ-7" } }),
        )
        .await;
        conn.enqueue_response(
            "Runtime.callFunctionOn",
            serde_json::json!({ "result": { "type": "string", "value": "" } }),
        )
        .await;

        element.clear().await.unwrap();

        let keys_sent = conn.calls_for("Input.dispatchKeyEvent").await;
        // Ctrl+A is four events, Backspace two.
        assert_eq!(keys_sent.len(), 6);
        assert_eq!(keys_sent[0].params.as_ref().unwrap()["key"], "Control");
        // The value check came back empty, so no JS reset followed.
        assert_eq!(conn.calls_for("Runtime.callFunctionOn").await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_after_frame_navigation() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.emit_method(
            "Page.frameNavigated",
            serde_json::json!({
                "frame": { "id": "MOCK-FRAME-1", "url": "https://example.com/next" }
            }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = element.text().await.unwrap_err();
        assert!(matches!(err, Error::StaleElement(_)));
    }

    #[tokio::test]
    async fn test_attribute_lookup() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.getAttributes",
            serde_json::json!({ "attributes": ["href", "/docs", "class", "btn"] }),
        )
        .await;

        assert_eq!(
            element.attribute("class").await.unwrap().as_deref(),
            Some("btn")
        );
    }

    #[tokio::test]
    async fn test_children_are_cached() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.querySelectorAll",
            serde_json::json!({ "nodeIds": [8, 9] }),
        )
        .await;

        let children = element.children().await.unwrap();
        assert_eq!(children.len(), 2);
        let again = element.children().await.unwrap();
        assert_eq!(again.len(), 2);
        // Only the first call reached the browser.
        assert_eq!(conn.calls_for("DOM.querySelectorAll").await.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_children_stale_after_frame_navigation() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.querySelectorAll",
            serde_json::json!({ "nodeIds": [8, 9] }),
        )
        .await;
        assert_eq!(element.children().await.unwrap().len(), 2);

        conn.emit_method(
            "Page.frameNavigated",
            serde_json::json!({
                "frame": { "id": "MOCK-FRAME-1", "url": "https://example.com/next" }
            }),
            Some("MOCK-SESSION-1"),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The cache does not outlive the document it was read from.
        let err = element.children().await.unwrap_err();
        assert!(matches!(err, Error::StaleElement(_)));
    }

    #[tokio::test]
    async fn test_parent_is_cached() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_response(
            "DOM.resolveNode",
            serde_json::json!({ "object": { "type": "object", "objectId": "OBJ-7" } }),
        )
        .await;
        conn.enqueue_response(
            "Runtime.callFunctionOn",
            serde_json::json!({ "result": { "type": "object", "objectId": "OBJ-PARENT" } }),
        )
        .await;

        let parent = element.parent().await.unwrap().unwrap();
        assert_eq!(parent.frame_id(), "MOCK-FRAME-1");
        assert!(element.parent().await.unwrap().is_some());
        // Only the first call reached the browser.
        assert_eq!(conn.calls_for("Runtime.callFunctionOn").await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_node_maps_to_stale() {
        let (conn, tab) = tab_with_mock().await;
        let element = found_element(&conn, &tab).await;

        conn.enqueue_error(
            "DOM.getAttributes",
            -32000,
            "Could not find node with given id",
        )
        .await;

        let err = element.attribute("id").await.unwrap_err();
        assert!(matches!(err, Error::StaleElement(_)));
    }
}
