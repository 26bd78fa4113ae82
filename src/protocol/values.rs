//! Remote value transformation
//!
//! CDP's `deepSerializedValue` tree is close to, but not identical to, the
//! BiDi `RemoteValue` shape. This module rewrites one into the other, and
//! converts BiDi local values into CDP call arguments.

use serde_json::{json, Map, Value};

use crate::cdp::types::CallArgument;
use crate::error::{Error, Result};

/// Divider between the navigable id and the backend node id in a `sharedId`
pub const SHARED_ID_DIVIDER: &str = "_element_";

/// Build the `sharedId` for a DOM node
pub fn shared_id(navigable_id: &str, backend_node_id: u64) -> String {
    format!("{}{}{}", navigable_id, SHARED_ID_DIVIDER, backend_node_id)
}

/// Rewrite a CDP deep-serialized value into a BiDi `RemoteValue`.
///
/// - `weakLocalObjectReference` becomes `internalId`
/// - `platformobject` collapses to a bare `object`
/// - nodes get a `sharedId` derived from the realm's navigable id, and drop
///   the CDP-internal `backendNodeId`/`loaderId` fields
/// - children, list elements, and map/object entries are rewritten
///   recursively
pub fn deep_to_remote_value(deep: Value, navigable_id: &str) -> Value {
    let mut obj = match deep {
        Value::Object(obj) => obj,
        other => return other,
    };

    let mut out = Map::new();

    if let Some(weak_ref) = obj.remove("weakLocalObjectReference") {
        out.insert("internalId".to_string(), json!(weak_ref.to_string()));
    }

    let value_type = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if value_type == "platformobject" {
        out.insert("type".to_string(), json!("object"));
        return Value::Object(out);
    }

    out.insert("type".to_string(), json!(value_type));
    let Some(value) = obj.remove("value") else {
        return Value::Object(out);
    };

    let value = match value_type.as_str() {
        "node" => rewrite_node(value, navigable_id, &mut out),
        "array" | "set" | "htmlcollection" | "nodelist" => rewrite_list(value, navigable_id),
        "object" | "map" => rewrite_entries(value, navigable_id),
        _ => value,
    };
    out.insert("value".to_string(), value);
    Value::Object(out)
}

fn rewrite_node(value: Value, navigable_id: &str, out: &mut Map<String, Value>) -> Value {
    let mut node = match value {
        Value::Object(node) => node,
        other => return other,
    };
    if let Some(backend_node_id) = node.remove("backendNodeId").and_then(|v| v.as_u64()) {
        out.insert(
            "sharedId".to_string(),
            json!(shared_id(navigable_id, backend_node_id)),
        );
    }
    node.remove("loaderId");
    if let Some(children) = node.remove("children") {
        node.insert("children".to_string(), rewrite_list(children, navigable_id));
    }
    if let Some(shadow_root) = node.remove("shadowRoot") {
        let rewritten = if shadow_root.is_null() {
            shadow_root
        } else {
            deep_to_remote_value(shadow_root, navigable_id)
        };
        node.insert("shadowRoot".to_string(), rewritten);
    }
    Value::Object(node)
}

fn rewrite_list(value: Value, navigable_id: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| deep_to_remote_value(item, navigable_id))
                .collect(),
        ),
        other => other,
    }
}

fn rewrite_entries(value: Value, navigable_id: &str) -> Value {
    let entries = match value {
        Value::Array(entries) => entries,
        other => return other,
    };
    Value::Array(
        entries
            .into_iter()
            .map(|entry| match entry {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let entry_value = deep_to_remote_value(pair.remove(1), navigable_id);
                    let key = pair.remove(0);
                    // String keys pass through; serialized keys are rewritten.
                    let key = if key.is_object() {
                        deep_to_remote_value(key, navigable_id)
                    } else {
                        key
                    };
                    json!([key, entry_value])
                }
                other => other,
            })
            .collect(),
    )
}

/// Convert a BiDi local value (a command argument) into a CDP call argument.
///
/// Primitives and handle references are supported; structured local values
/// are not.
pub fn local_value_to_call_argument(value: &Value) -> Result<CallArgument> {
    if let Some(handle) = value.get("handle").and_then(Value::as_str) {
        return Ok(CallArgument {
            object_id: Some(handle.to_string()),
            ..Default::default()
        });
    }

    let value_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_argument(format!("Invalid local value {}", value)))?;

    match value_type {
        "undefined" => Ok(CallArgument::default()),
        "null" => Ok(CallArgument {
            value: Some(Value::Null),
            ..Default::default()
        }),
        "string" | "boolean" => Ok(CallArgument {
            value: Some(value.get("value").cloned().unwrap_or(Value::Null)),
            ..Default::default()
        }),
        "number" => match value.get("value") {
            Some(Value::String(special)) => Ok(CallArgument {
                unserializable_value: Some(special.clone()),
                ..Default::default()
            }),
            Some(number) => Ok(CallArgument {
                value: Some(number.clone()),
                ..Default::default()
            }),
            None => Err(Error::invalid_argument("Missing number value")),
        },
        "bigint" => {
            let digits = value
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::invalid_argument("Missing bigint value"))?;
            Ok(CallArgument {
                unserializable_value: Some(format!("{}n", digits)),
                ..Default::default()
            })
        }
        other => Err(Error::UnsupportedOperation(format!(
            "Local values of type {} are not supported",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_passthrough() {
        let deep = json!({"type": "number", "value": 1});
        assert_eq!(
            deep_to_remote_value(deep, "NAV"),
            json!({"type": "number", "value": 1})
        );
    }

    #[test]
    fn test_weak_reference_becomes_internal_id() {
        let deep = json!({"type": "object", "value": [], "weakLocalObjectReference": 3});
        let remote = deep_to_remote_value(deep, "NAV");
        assert_eq!(remote["internalId"], "3");
        assert!(remote.get("weakLocalObjectReference").is_none());
    }

    #[test]
    fn test_platformobject_collapses() {
        let deep = json!({"type": "platformobject", "value": {"anything": true}});
        assert_eq!(deep_to_remote_value(deep, "NAV"), json!({"type": "object"}));
    }

    #[test]
    fn test_node_gets_shared_id() {
        let deep = json!({
            "type": "node",
            "value": {
                "nodeType": 1,
                "backendNodeId": 42,
                "loaderId": "L1",
                "childNodeCount": 1,
                "children": [
                    {"type": "node", "value": {"nodeType": 3, "backendNodeId": 43}}
                ]
            }
        });
        let remote = deep_to_remote_value(deep, "NAV");
        assert_eq!(remote["sharedId"], "NAV_element_42");
        assert!(remote["value"].get("backendNodeId").is_none());
        assert!(remote["value"].get("loaderId").is_none());
        assert_eq!(remote["value"]["children"][0]["sharedId"], "NAV_element_43");
    }

    #[test]
    fn test_object_entries_recurse() {
        let deep = json!({
            "type": "object",
            "value": [["a", {"type": "number", "value": 1}]]
        });
        let remote = deep_to_remote_value(deep, "NAV");
        assert_eq!(
            remote,
            json!({"type": "object", "value": [["a", {"type": "number", "value": 1}]]})
        );
    }

    #[test]
    fn test_map_with_serialized_keys() {
        let deep = json!({
            "type": "map",
            "value": [[{"type": "string", "value": "k"}, {"type": "boolean", "value": true}]]
        });
        let remote = deep_to_remote_value(deep, "NAV");
        assert_eq!(remote["value"][0][0], json!({"type": "string", "value": "k"}));
        assert_eq!(remote["value"][0][1], json!({"type": "boolean", "value": true}));
    }

    #[test]
    fn test_array_elements_recurse() {
        let deep = json!({
            "type": "array",
            "value": [{"type": "platformobject", "value": {}}]
        });
        let remote = deep_to_remote_value(deep, "NAV");
        assert_eq!(remote["value"][0], json!({"type": "object"}));
    }

    #[test]
    fn test_call_argument_from_handle() {
        let arg = local_value_to_call_argument(&json!({"handle": "obj-1"})).unwrap();
        assert_eq!(arg.object_id.as_deref(), Some("obj-1"));
    }

    #[test]
    fn test_call_argument_special_number() {
        let arg = local_value_to_call_argument(&json!({"type": "number", "value": "NaN"})).unwrap();
        assert_eq!(arg.unserializable_value.as_deref(), Some("NaN"));
        assert!(arg.value.is_none());
    }

    #[test]
    fn test_call_argument_structured_is_unsupported() {
        let err = local_value_to_call_argument(&json!({"type": "array", "value": []})).unwrap_err();
        assert_eq!(err.code(), "unsupported operation");
    }
}
