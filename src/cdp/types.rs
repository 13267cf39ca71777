//! CDP (Chrome DevTools Protocol) type definitions
//!
//! Wire-level message structures plus the protocol parameter/result
//! payloads the driver layer exchanges with the browser.

use serde::{Deserialize, Serialize};

/// CDP JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    /// Request ID
    pub id: u64,
    /// Method name (e.g., "Page.navigate")
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Session ID for flat-mode session routing
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct CdpRpcResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    /// Response result
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error if any
    #[serde(default)]
    pub error: Option<CdpErrorDetail>,
    /// Session the answered command was routed to
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// CDP error detail
#[derive(Debug, Clone, Deserialize)]
pub struct CdpErrorDetail {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// CDP notification/event
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    /// Event method (e.g., "Page.loadEventFired")
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Session the event originated from
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Classified incoming message (server -> client)
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Answer to a previously sent command
    Response(CdpRpcResponse),
    /// Unsolicited event
    Event(CdpEvent),
}

// ---------------------------------------------------------------------------
// Browser domain

/// Browser.getVersion response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVersionResponse {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub js_version: String,
}

// ---------------------------------------------------------------------------
// Page domain

/// Page navigation parameters
#[derive(Debug, Clone, Serialize)]
pub struct NavigateParams {
    /// URL to navigate to
    pub url: String,
    /// Referrer URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Transition type
    #[serde(skip_serializing_if = "Option::is_none", rename = "transitionType")]
    pub transition_type: Option<String>,
}

/// Page navigation response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResponse {
    /// Frame the navigation happened in
    pub frame_id: String,
    /// Loader identifier
    #[serde(default)]
    pub loader_id: Option<String>,
    /// Browser-reported failure (e.g. a net:: error string)
    #[serde(default)]
    pub error_text: Option<String>,
}

/// One frame in the page's frame tree
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    /// Frame ID
    pub id: String,
    /// Parent frame ID (absent for the root)
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Document URL
    #[serde(default)]
    pub url: String,
    /// Frame name as set by the embedding element
    #[serde(default)]
    pub name: Option<String>,
}

/// Page.getFrameTree response node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeNode {
    /// This frame
    pub frame: FrameInfo,
    /// Nested frames
    #[serde(default)]
    pub child_frames: Option<Vec<FrameTreeNode>>,
}

/// Page.getFrameTree response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFrameTreeResponse {
    pub frame_tree: FrameTreeNode,
}

/// Page.frameAttached event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedParams {
    pub frame_id: String,
    pub parent_frame_id: String,
}

/// Page.frameNavigated event parameters
#[derive(Debug, Clone, Deserialize)]
pub struct FrameNavigatedParams {
    pub frame: FrameInfo,
}

/// Page.frameDetached event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedParams {
    pub frame_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Page.getNavigationHistory response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationHistoryResponse {
    pub current_index: i64,
    pub entries: Vec<NavigationHistoryEntry>,
}

/// One entry in the tab's navigation history
#[derive(Debug, Clone, Deserialize)]
pub struct NavigationHistoryEntry {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Page.captureScreenshot response
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureScreenshotResponse {
    /// Base64-encoded image data
    pub data: String,
}

// ---------------------------------------------------------------------------
// Runtime domain

/// JavaScript evaluation parameters
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateParams {
    /// JavaScript expression to evaluate
    pub expression: String,
    /// Whether to await promise
    #[serde(skip_serializing_if = "Option::is_none", rename = "awaitPromise")]
    pub await_promise: Option<bool>,
    /// Whether to return as value
    #[serde(skip_serializing_if = "Option::is_none", rename = "returnByValue")]
    pub return_by_value: Option<bool>,
    /// Execution context ID
    #[serde(skip_serializing_if = "Option::is_none", rename = "contextId")]
    pub context_id: Option<i64>,
}

/// Remote object (result of JavaScript evaluation)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteObject {
    /// Object type
    #[serde(default)]
    pub r#type: String,
    /// Object subtype
    #[serde(default)]
    pub subtype: Option<String>,
    /// Object value
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Object description
    #[serde(default)]
    pub description: Option<String>,
    /// Unserializable value
    #[serde(rename = "unserializableValue", default)]
    pub unserializable_value: Option<String>,
    /// Handle for JS-side references
    #[serde(rename = "objectId", default)]
    pub object_id: Option<String>,
}

/// Exception details
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Exception ID
    pub exception_id: i64,
    /// Exception text
    #[serde(default)]
    pub text: String,
    /// Line number
    #[serde(default)]
    pub line_number: i64,
    /// Column number
    #[serde(default)]
    pub column_number: i64,
    /// Exception object
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best human-readable description of the thrown value
    pub fn message(&self) -> String {
        if let Some(exception) = &self.exception {
            if let Some(description) = &exception.description {
                return description.clone();
            }
        }
        self.text.clone()
    }
}

/// JavaScript evaluation response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// Evaluation result
    #[serde(default)]
    pub result: RemoteObject,
    /// Exception details if evaluation failed
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// Runtime.executionContextCreated description
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aux_data: serde_json::Value,
}

impl ExecutionContextDescription {
    /// Frame this context belongs to, when the browser says so
    pub fn frame_id(&self) -> Option<&str> {
        self.aux_data.get("frameId").and_then(|v| v.as_str())
    }

    /// Whether this is the frame's default (main world) context
    pub fn is_default(&self) -> bool {
        self.aux_data
            .get("isDefault")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Runtime.executionContextCreated event parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContextCreatedParams {
    pub context: ExecutionContextDescription,
}

/// Runtime.executionContextDestroyed event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedParams {
    pub execution_context_id: i64,
}

// ---------------------------------------------------------------------------
// DOM domain

/// Document node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node ID
    pub node_id: i64,
    /// Backend ID
    #[serde(default)]
    pub backend_node_id: i64,
    /// Node type
    #[serde(default)]
    pub node_type: i64,
    /// Node name
    #[serde(default)]
    pub node_name: String,
    /// Local name
    #[serde(default)]
    pub local_name: String,
    /// Node value
    #[serde(default)]
    pub node_value: String,
    /// Child node count
    #[serde(default)]
    pub child_node_count: i64,
    /// Children
    #[serde(default)]
    pub children: Option<Vec<Node>>,
    /// Attributes as a flat name/value pair array
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    /// Owning frame (present on document and frame-owner nodes)
    #[serde(default)]
    pub frame_id: Option<String>,
    /// Content document for frame-owner nodes
    #[serde(default)]
    pub content_document: Option<Box<Node>>,
}

/// DOM.getDocument response
#[derive(Debug, Clone, Deserialize)]
pub struct GetDocumentResponse {
    /// Root node
    pub root: Node,
}

/// DOM.querySelector response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySelectorResponse {
    pub node_id: i64,
}

/// DOM.querySelectorAll response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySelectorAllResponse {
    pub node_ids: Vec<i64>,
}

/// DOM.describeNode response
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeNodeResponse {
    pub node: Node,
}

/// DOM.resolveNode response
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveNodeResponse {
    pub object: RemoteObject,
}

/// DOM.requestNode response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNodeResponse {
    pub node_id: i64,
}

/// DOM.getAttributes response
#[derive(Debug, Clone, Deserialize)]
pub struct GetAttributesResponse {
    /// Interleaved name/value pairs
    pub attributes: Vec<String>,
}

/// DOM.getOuterHTML response
#[derive(Debug, Clone, Deserialize)]
pub struct GetOuterHtmlResponse {
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
}

/// DOM.performSearch response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformSearchResponse {
    pub search_id: String,
    pub result_count: i64,
}

/// DOM.getSearchResults response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSearchResultsResponse {
    pub node_ids: Vec<i64>,
}

/// DOM.getBoxModel response
#[derive(Debug, Clone, Deserialize)]
pub struct GetBoxModelResponse {
    pub model: BoxModel,
}

/// Element box model
#[derive(Debug, Clone, Deserialize)]
pub struct BoxModel {
    /// Content quad: [x1, y1, x2, y2, x3, y3, x4, y4]
    pub content: Vec<f64>,
    pub width: f64,
    pub height: f64,
}

impl BoxModel {
    /// Center point of the content quad
    pub fn content_center(&self) -> Option<(f64, f64)> {
        if self.content.len() < 8 {
            return None;
        }
        let xs = [self.content[0], self.content[2], self.content[4], self.content[6]];
        let ys = [self.content[1], self.content[3], self.content[5], self.content[7]];
        let cx = xs.iter().sum::<f64>() / 4.0;
        let cy = ys.iter().sum::<f64>() / 4.0;
        Some((cx, cy))
    }
}

// ---------------------------------------------------------------------------
// Input domain

/// Input.dispatchKeyEvent parameters
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DispatchKeyEventParams {
    /// "keyDown", "keyUp", "rawKeyDown" or "char"
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_virtual_key_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_virtual_key_code: Option<i64>,
}

/// Input.dispatchMouseEvent parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMouseEventParams {
    /// "mousePressed", "mouseReleased" or "mouseMoved"
    #[serde(rename = "type")]
    pub event_type: String,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<i64>,
}

// ---------------------------------------------------------------------------
// Target domain

/// Target descriptor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    /// "page", "iframe", "worker", ...
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub browser_context_id: Option<String>,
}

/// Target.getTargets response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTargetsResponse {
    pub target_infos: Vec<TargetInfo>,
}

/// Target.attachToTarget response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResponse {
    pub session_id: String,
}

/// Target.createTarget response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetResponse {
    pub target_id: String,
}

/// Target.attachedToTarget event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetParams {
    pub session_id: String,
    pub target_info: TargetInfo,
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

/// Target.detachedFromTarget event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    pub session_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

/// Target.targetInfoChanged event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfoChangedParams {
    pub target_info: TargetInfo,
}

// ---------------------------------------------------------------------------
// Network / Fetch domains

/// Request descriptor carried by network and fetch events
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequestInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: serde_json::Value,
}

/// Response descriptor carried by Network.responseReceived
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
}

/// Network.requestWillBeSent event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    pub request_id: String,
    pub request: RequestInfo,
}

/// Network.responseReceived event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    pub request_id: String,
    pub response: ResponseInfo,
}

/// Header entry for Fetch.fulfillRequest and Fetch.continueRequest
#[derive(Debug, Clone, Serialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// URL pattern for Fetch.enable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_stage: Option<String>,
}

/// Fetch.requestPaused event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedParams {
    pub request_id: String,
    #[serde(default)]
    pub request: RequestInfo,
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub resource_type: String,
    /// Present only at the Response stage
    #[serde(default)]
    pub response_status_code: Option<i64>,
    #[serde(default)]
    pub network_id: Option<String>,
}

/// Auth challenge carried by Fetch.authRequired
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthChallenge {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
}

/// Fetch.authRequired event parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredParams {
    pub request_id: String,
    #[serde(default)]
    pub request: RequestInfo,
    #[serde(default)]
    pub auth_challenge: AuthChallenge,
}

/// Fetch.getResponseBody response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponseBodyResponse {
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}
