//! Request interception over the Fetch domain
//!
//! A tab enables interception with URL patterns; the browser then
//! pauses matching requests until told to continue, fulfill, or fail
//! them. Pausing at the Response stage additionally exposes the
//! response body and lets the status line or headers be rewritten
//! before the page sees them.

use crate::cdp::traits::{CdpConnection, EventStream};
use crate::cdp::types::{
    GetResponseBodyResponse, HeaderEntry, RequestInfo, RequestPattern, RequestPausedParams,
};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stage at which a matching request is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Request,
    Response,
}

impl RequestStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStage::Request => "Request",
            RequestStage::Response => "Response",
        }
    }
}

/// Build a Fetch.enable pattern
pub fn pattern(url_pattern: &str, stage: RequestStage) -> RequestPattern {
    RequestPattern {
        url_pattern: Some(url_pattern.to_string()),
        resource_type: None,
        request_stage: Some(stage.as_str().to_string()),
    }
}

/// Active interception scope for one tab
///
/// Yields paused requests until `disable` is called. While a scope is
/// live, the tab's automatic pass-through of paused requests is
/// suspended so the two never answer the same request.
pub struct FetchInterception {
    connection: Arc<dyn CdpConnection>,
    session_id: String,
    events: EventStream,
    active_flag: Arc<AtomicBool>,
}

impl FetchInterception {
    /// The caller raises `active_flag` before enabling the Fetch domain;
    /// this scope only lowers it again on disable/drop.
    pub(crate) fn new(
        connection: Arc<dyn CdpConnection>,
        session_id: String,
        events: EventStream,
        active_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connection,
            session_id,
            events,
            active_flag,
        }
    }

    /// Next paused request
    pub async fn next(&mut self) -> Result<InterceptedRequest> {
        let event = self
            .events
            .next_event()
            .await
            .ok_or_else(|| Error::connection_closed("event stream ended"))?;

        let params: RequestPausedParams = serde_json::from_value(event.params)
            .map_err(|e| Error::decode(format!("Invalid requestPaused payload: {}", e)))?;

        Ok(InterceptedRequest {
            connection: Arc::clone(&self.connection),
            session_id: self.session_id.clone(),
            params,
        })
    }

    /// Stop intercepting; future requests flow normally
    pub async fn disable(self) -> Result<()> {
        self.active_flag.store(false, Ordering::SeqCst);
        self.connection
            .send_command(Some(&self.session_id), "Fetch.disable", None)
            .await?;
        Ok(())
    }
}

impl Drop for FetchInterception {
    fn drop(&mut self) {
        // Hand paused-request handling back to the tab even when the
        // scope is dropped without an explicit disable.
        self.active_flag.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for FetchInterception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchInterception")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// One paused request and the actions that resolve it
#[derive(Debug)]
pub struct InterceptedRequest {
    connection: Arc<dyn CdpConnection>,
    session_id: String,
    params: RequestPausedParams,
}

impl InterceptedRequest {
    pub fn request_id(&self) -> &str {
        &self.params.request_id
    }

    pub fn request(&self) -> &RequestInfo {
        &self.params.request
    }

    pub fn url(&self) -> &str {
        &self.params.request.url
    }

    pub fn resource_type(&self) -> &str {
        &self.params.resource_type
    }

    /// Whether this request paused at the Response stage
    pub fn is_response_stage(&self) -> bool {
        self.params.response_status_code.is_some()
    }

    pub fn response_status_code(&self) -> Option<i64> {
        self.params.response_status_code
    }

    /// Let the request proceed unchanged
    pub async fn continue_request(&self) -> Result<()> {
        self.connection
            .send_command(
                Some(&self.session_id),
                "Fetch.continueRequest",
                Some(serde_json::json!({ "requestId": self.params.request_id })),
            )
            .await?;
        Ok(())
    }

    /// Let the request proceed with overrides
    pub async fn continue_with(
        &self,
        url: Option<&str>,
        method: Option<&str>,
        post_data: Option<&[u8]>,
        headers: Option<Vec<HeaderEntry>>,
    ) -> Result<()> {
        let mut params = serde_json::json!({ "requestId": self.params.request_id });
        if let Some(url) = url {
            params["url"] = serde_json::json!(url);
        }
        if let Some(method) = method {
            params["method"] = serde_json::json!(method);
        }
        if let Some(post_data) = post_data {
            params["postData"] = serde_json::json!(BASE64.encode(post_data));
        }
        if let Some(headers) = headers {
            params["headers"] = serde_json::to_value(headers)?;
        }

        self.connection
            .send_command(Some(&self.session_id), "Fetch.continueRequest", Some(params))
            .await?;
        Ok(())
    }

    /// Answer the request from here without hitting the network
    pub async fn fulfill(
        &self,
        response_code: i64,
        headers: Vec<HeaderEntry>,
        body: &[u8],
    ) -> Result<()> {
        let params = serde_json::json!({
            "requestId": self.params.request_id,
            "responseCode": response_code,
            "responseHeaders": serde_json::to_value(headers)?,
            "body": BASE64.encode(body),
        });

        self.connection
            .send_command(Some(&self.session_id), "Fetch.fulfillRequest", Some(params))
            .await?;
        Ok(())
    }

    /// Abort the request with a network error reason such as "Failed",
    /// "Aborted" or "BlockedByClient"
    pub async fn fail(&self, error_reason: &str) -> Result<()> {
        self.connection
            .send_command(
                Some(&self.session_id),
                "Fetch.failRequest",
                Some(serde_json::json!({
                    "requestId": self.params.request_id,
                    "errorReason": error_reason,
                })),
            )
            .await?;
        Ok(())
    }

    /// Let a response paused at the Response stage proceed, optionally
    /// overriding its status code, status phrase, or headers while the
    /// body keeps streaming from the network
    pub async fn continue_with_response(
        &self,
        response_code: Option<i64>,
        response_phrase: Option<&str>,
        headers: Option<Vec<HeaderEntry>>,
    ) -> Result<()> {
        let mut params = serde_json::json!({ "requestId": self.params.request_id });
        if let Some(response_code) = response_code {
            params["responseCode"] = serde_json::json!(response_code);
        }
        if let Some(response_phrase) = response_phrase {
            params["responsePhrase"] = serde_json::json!(response_phrase);
        }
        if let Some(headers) = headers {
            params["responseHeaders"] = serde_json::to_value(headers)?;
        }

        self.connection
            .send_command(
                Some(&self.session_id),
                "Fetch.continueResponse",
                Some(params),
            )
            .await?;
        Ok(())
    }

    /// Body of the paused response; only valid at the Response stage
    pub async fn response_body(&self) -> Result<Vec<u8>> {
        let result = self
            .connection
            .send_command(
                Some(&self.session_id),
                "Fetch.getResponseBody",
                Some(serde_json::json!({ "requestId": self.params.request_id })),
            )
            .await?;

        let response: GetResponseBodyResponse = serde_json::from_value(result)
            .map_err(|e| Error::decode(format!("Invalid getResponseBody response: {}", e)))?;

        if response.base64_encoded {
            BASE64
                .decode(response.body.as_bytes())
                .map_err(|e| Error::decode(format!("Invalid response body encoding: {}", e)))
        } else {
            Ok(response.body.into_bytes())
        }
    }
}
