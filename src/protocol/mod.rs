//! BiDi wire protocol: envelope parsing and outbound message building
//!
//! The envelope is parsed field-by-field from JSON rather than through a
//! derive, so malformed payloads yield the precise `invalid argument`
//! messages the protocol requires, with the command `id` recovered whenever
//! the payload allows it.

pub mod commands;
pub mod values;

use serde_json::{json, Map, Value};

/// A validated inbound command envelope
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub channel: Option<String>,
}

/// Envelope validation failure: the message to report, plus the command id
/// when it could be recovered from the malformed payload.
#[derive(Debug, Clone)]
pub struct EnvelopeError {
    pub id: Option<u64>,
    pub message: String,
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Parse and validate one raw BiDi message
pub fn parse_envelope(raw: &str) -> Result<CommandEnvelope, EnvelopeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| EnvelopeError {
        id: None,
        message: format!("Cannot parse data as JSON: {}", e),
    })?;

    let obj = value.as_object().ok_or_else(|| EnvelopeError {
        id: None,
        message: format!("Expected command object but got {}", value),
    })?;

    // id is recoverable from here on; attach it to any further failure.
    let id = match obj.get("id").and_then(Value::as_u64) {
        Some(id) => id,
        None => {
            return Err(EnvelopeError {
                id: None,
                message: format!(
                    "Expected unsigned integer but got {}",
                    describe(obj.get("id"))
                ),
            })
        }
    };

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => {
            return Err(EnvelopeError {
                id: Some(id),
                message: format!("Expected string but got {}", describe(obj.get("method"))),
            })
        }
    };

    let params = match obj.get("params") {
        Some(p) if p.is_object() => p.clone(),
        other => {
            return Err(EnvelopeError {
                id: Some(id),
                message: format!("Expected object but got {}", describe(other)),
            })
        }
    };

    let channel = match obj.get("channel") {
        None => None,
        Some(c) => match c.as_str() {
            // Empty string is normalized to absent.
            Some("") => None,
            Some(c) => Some(c.to_string()),
            None => {
                return Err(EnvelopeError {
                    id: Some(id),
                    message: format!("Expected string but got {}", c),
                })
            }
        },
    };

    Ok(CommandEnvelope {
        id,
        method,
        params,
        channel,
    })
}

fn with_channel(mut obj: Map<String, Value>, channel: Option<&str>) -> Value {
    if let Some(channel) = channel {
        obj.insert("channel".to_string(), json!(channel));
    }
    Value::Object(obj)
}

/// Build a success response wire string
pub fn build_response(id: u64, result: Value, channel: Option<&str>) -> String {
    let mut obj = Map::new();
    obj.insert("id".to_string(), json!(id));
    obj.insert("result".to_string(), result);
    with_channel(obj, channel).to_string()
}

/// Build an error response wire string. `id` is omitted when it could not
/// be recovered from the inbound payload.
pub fn build_error(
    id: Option<u64>,
    error: &str,
    message: &str,
    stacktrace: Option<&str>,
    channel: Option<&str>,
) -> String {
    let mut obj = Map::new();
    if let Some(id) = id {
        obj.insert("id".to_string(), json!(id));
    }
    obj.insert("error".to_string(), json!(error));
    obj.insert("message".to_string(), json!(message));
    if let Some(stacktrace) = stacktrace {
        obj.insert("stacktrace".to_string(), json!(stacktrace));
    }
    with_channel(obj, channel).to_string()
}

/// Build an event wire string
pub fn build_event(method: &str, params: &Value, channel: Option<&str>) -> String {
    let mut obj = Map::new();
    obj.insert("method".to_string(), json!(method));
    obj.insert("params".to_string(), params.clone());
    with_channel(obj, channel).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_envelope() {
        let env = parse_envelope(
            r#"{"id":1,"method":"browsingContext.getTree","params":{},"channel":"ch"}"#,
        )
        .unwrap();
        assert_eq!(env.id, 1);
        assert_eq!(env.method, "browsingContext.getTree");
        assert_eq!(env.channel.as_deref(), Some("ch"));
    }

    #[test]
    fn test_missing_id() {
        let err = parse_envelope(r#"{"method":"x","params":{}}"#).unwrap_err();
        assert!(err.id.is_none());
        assert_eq!(err.message, "Expected unsigned integer but got undefined");
    }

    #[test]
    fn test_negative_id() {
        let err = parse_envelope(r#"{"id":-1,"method":"x","params":{}}"#).unwrap_err();
        assert!(err.id.is_none());
        assert_eq!(err.message, "Expected unsigned integer but got -1");
    }

    #[test]
    fn test_non_integer_id() {
        let err = parse_envelope(r#"{"id":"5","method":"x","params":{}}"#).unwrap_err();
        assert!(err.id.is_none());
        assert_eq!(err.message, "Expected unsigned integer but got \"5\"");
    }

    #[test]
    fn test_missing_method_recovers_id() {
        let err = parse_envelope(r#"{"id":9,"params":{}}"#).unwrap_err();
        assert_eq!(err.id, Some(9));
        assert_eq!(err.message, "Expected string but got undefined");
    }

    #[test]
    fn test_missing_params_recovers_id() {
        let err = parse_envelope(r#"{"id":2,"method":"x"}"#).unwrap_err();
        assert_eq!(err.id, Some(2));
        assert_eq!(err.message, "Expected object but got undefined");
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_envelope("{oops").unwrap_err();
        assert!(err.id.is_none());
        assert!(err.message.starts_with("Cannot parse data as JSON"));
    }

    #[test]
    fn test_empty_channel_is_absent() {
        let env = parse_envelope(r#"{"id":1,"method":"x","params":{},"channel":""}"#).unwrap();
        assert!(env.channel.is_none());
    }

    #[test]
    fn test_non_string_channel_rejected() {
        let err = parse_envelope(r#"{"id":1,"method":"x","params":{},"channel":7}"#).unwrap_err();
        assert_eq!(err.id, Some(1));
        assert_eq!(err.message, "Expected string but got 7");
    }

    #[test]
    fn test_error_without_id_omits_field() {
        let wire = build_error(None, "invalid argument", "bad", None, None);
        let v: Value = serde_json::from_str(&wire).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["error"], "invalid argument");
    }

    #[test]
    fn test_response_echoes_channel() {
        let wire = build_response(4, json!({}), Some("ch"));
        let v: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(v["id"], 4);
        assert_eq!(v["channel"], "ch");
    }
}
