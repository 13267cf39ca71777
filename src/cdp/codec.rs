//! Wire codec for CDP messages
//!
//! Encoding produces one text frame per command. Decoding classifies on
//! message shape alone: a `method` field means event, an `id` without
//! `method` means command result. The protocol may echo context fields
//! next to `method`, so the event check runs first.

use super::types::{CdpEvent, CdpRequest, CdpRpcResponse, IncomingMessage};
use crate::{Error, Result};

/// Encode a command into a wire frame
pub fn encode_command(request: &CdpRequest) -> Result<String> {
    serde_json::to_string(request).map_err(Error::Serialization)
}

/// Decode one incoming frame into a classified message
///
/// A failure here is scoped to this frame; callers drop the frame and
/// keep the connection up.
pub fn decode_message(text: &str) -> Result<IncomingMessage> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::decode(format!("Invalid JSON frame: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::decode("Frame is not a JSON object"))?;

    if obj.get("method").map(|m| m.is_string()).unwrap_or(false) {
        let event: CdpEvent = serde_json::from_value(value)
            .map_err(|e| Error::decode(format!("Malformed event frame: {}", e)))?;
        return Ok(IncomingMessage::Event(event));
    }

    if obj.contains_key("id") {
        let response: CdpRpcResponse = serde_json::from_value(value)
            .map_err(|e| Error::decode(format!("Malformed response frame: {}", e)))?;
        return Ok(IncomingMessage::Response(response));
    }

    Err(Error::decode("Frame carries neither method nor id"))
}
