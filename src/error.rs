//! Unified error types for Oxdriver

use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Oxdriver
///
/// Every failure class callers may want to branch on is a distinct
/// variant; retry logic never has to string-match messages.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors (handshake, frame-level transport)
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection is closed; the command or wait cannot complete.
    /// Fatal to the connection: every in-flight command fails with this.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A single incoming frame could not be decoded; the frame is
    /// dropped, the connection stays up
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The browser answered a command with an error payload
    #[error("Protocol error in {method}: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// A newer navigation on the same tab preempted this wait
    #[error("Navigation superseded: {0}")]
    NavigationSuperseded(String),

    /// Navigation failed (browser-reported, e.g. a net:: error)
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// Script execution failed (JS exception during evaluate)
    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The addressed session was detached or its target crashed;
    /// commands against it will never be answered
    #[error("Stale session: {0}")]
    StaleSession(String),

    /// Target not found
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Frame not found
    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    /// Element not found
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The element's node no longer resolves (frame navigated or node
    /// detached); the caller must re-query
    #[error("Stale element: {0}")]
    StaleElement(String),

    /// HTTP endpoint errors (browser /json discovery)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new connection closed error
    pub fn connection_closed<S: Into<String>>(msg: S) -> Self {
        Error::ConnectionClosed(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Error::Decode(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<M: Into<String>, S: Into<String>>(method: M, code: i64, message: S) -> Self {
        Error::Protocol {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new navigation superseded error
    pub fn navigation_superseded<S: Into<String>>(msg: S) -> Self {
        Error::NavigationSuperseded(msg.into())
    }

    /// Create a new navigation failed error
    pub fn navigation_failed<S: Into<String>>(msg: S) -> Self {
        Error::NavigationFailed(msg.into())
    }

    /// Create a new script execution failed error
    pub fn script_execution_failed<S: Into<String>>(msg: S) -> Self {
        Error::ScriptExecutionFailed(msg.into())
    }

    /// Create a new session not found error
    pub fn session_not_found<S: Into<String>>(id: S) -> Self {
        Error::SessionNotFound(id.into())
    }

    /// Create a new stale session error
    pub fn stale_session<S: Into<String>>(id: S) -> Self {
        Error::StaleSession(id.into())
    }

    /// Create a new target not found error
    pub fn target_not_found<S: Into<String>>(id: S) -> Self {
        Error::TargetNotFound(id.into())
    }

    /// Create a new frame not found error
    pub fn frame_not_found<S: Into<String>>(msg: S) -> Self {
        Error::FrameNotFound(msg.into())
    }

    /// Create a new element not found error
    pub fn element_not_found<S: Into<String>>(msg: S) -> Self {
        Error::ElementNotFound(msg.into())
    }

    /// Create a new stale element error
    pub fn stale_element<S: Into<String>>(msg: S) -> Self {
        Error::StaleElement(msg.into())
    }

    /// Create a new HTTP error
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Error::Http(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Http(error.to_string())
    }
}
