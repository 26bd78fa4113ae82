//! CDP wire message parsing
//!
//! The mediator does not own a socket. The embedder hands it a pair of
//! string channels carrying CDP JSON in both directions; this module turns
//! the raw inbound strings into [`CdpMessage`]s for the connection to route.

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A parsed CDP message (response or event)
#[derive(Debug)]
pub enum CdpMessage {
    Response {
        id: u64,
        result: Result<Value>,
    },
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

/// Parse one raw CDP wire string. Returns `None` for unusable payloads,
/// which are logged and skipped so one bad frame cannot wedge the reader.
pub fn parse_message(text: &str) -> Option<CdpMessage> {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Failed to parse CDP message: {} - {}", e, text);
            return None;
        }
    };

    if let Some(id) = msg.get("id").and_then(|v| v.as_u64()) {
        let result = if let Some(error) = msg.get("error") {
            Err(Error::cdp(
                msg.get("method")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown"),
                error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown"),
            ))
        } else {
            Ok(msg.get("result").cloned().unwrap_or(json!({})))
        };
        return Some(CdpMessage::Response { id, result });
    }

    if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
        let params = msg.get("params").cloned().unwrap_or(json!({}));
        let session_id = msg
            .get("sessionId")
            .and_then(|s| s.as_str())
            .map(String::from);
        return Some(CdpMessage::Event {
            method: method.to_string(),
            params,
            session_id,
        });
    }

    tracing::warn!("CDP message is neither response nor event: {}", text);
    None
}

/// Build the outbound wire string for a command
pub fn build_command(id: u64, method: &str, params: &Value, session_id: Option<&str>) -> String {
    let mut msg = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(session) = session_id {
        msg["sessionId"] = json!(session);
    }
    msg.to_string()
}
