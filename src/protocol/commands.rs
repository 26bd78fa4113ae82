//! Typed parameter structs for the BiDi commands the mediator accepts
//!
//! Each command's `params` object deserializes into one of these; a serde
//! failure surfaces as `invalid argument` with the serde message.

use serde::Deserialize;
use serde_json::Value;

use crate::cdp::types::SerializationOptions;
use crate::error::{Error, Result};

/// Deserialize a command's params, mapping failure to `invalid argument`
pub fn parse_params<'a, T: Deserialize<'a>>(params: &'a Value) -> Result<T> {
    T::deserialize(params).map_err(|e| Error::invalid_argument(e.to_string()))
}

// === session ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub events: Vec<String>,
    #[serde(default)]
    pub contexts: Option<Vec<String>>,
}

// === browsingContext ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    #[default]
    None,
    Interactive,
    Complete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTreeParams {
    #[serde(default)]
    pub max_depth: Option<u64>,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateType {
    Tab,
    Window,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    pub r#type: CreateType,
    #[serde(default)]
    pub reference_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub context: String,
    pub url: String,
    #[serde(default)]
    pub wait: ReadinessState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadParams {
    pub context: String,
    #[serde(default)]
    pub ignore_cache: Option<bool>,
    #[serde(default)]
    pub wait: ReadinessState,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
    pub context: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScreenshotParams {
    pub context: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintMarginParams {
    #[serde(default)]
    pub top: Option<f64>,
    #[serde(default)]
    pub bottom: Option<f64>,
    #[serde(default)]
    pub left: Option<f64>,
    #[serde(default)]
    pub right: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintPageParams {
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintParams {
    pub context: String,
    #[serde(default)]
    pub background: Option<bool>,
    #[serde(default)]
    pub margin: Option<PrintMarginParams>,
    #[serde(default)]
    pub orientation: Option<String>,
    #[serde(default)]
    pub page: Option<PrintPageParams>,
    #[serde(default)]
    pub page_ranges: Option<Vec<Value>>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub shrink_to_fit: Option<bool>,
}

// === script ===

/// Where a script command runs: a realm directly, or a context's principal
/// (or named sandbox) realm.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptTarget {
    Realm {
        realm: String,
    },
    Context {
        context: String,
        #[serde(default)]
        sandbox: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOwnership {
    Root,
    #[default]
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    pub expression: String,
    pub target: ScriptTarget,
    pub await_promise: bool,
    #[serde(default)]
    pub result_ownership: ResultOwnership,
    #[serde(default)]
    pub serialization_options: Option<SerializationOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionParams {
    pub function_declaration: String,
    pub target: ScriptTarget,
    pub await_promise: bool,
    #[serde(default)]
    pub this: Option<Value>,
    #[serde(default)]
    pub arguments: Option<Vec<Value>>,
    #[serde(default)]
    pub result_ownership: ResultOwnership,
    #[serde(default)]
    pub serialization_options: Option<SerializationOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisownParams {
    pub handles: Vec<String>,
    pub target: ScriptTarget,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRealmsParams {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPreloadScriptParams {
    pub function_declaration: String,
    #[serde(default)]
    pub arguments: Option<Vec<Value>>,
    #[serde(default)]
    pub sandbox: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePreloadScriptParams {
    pub script: String,
}

// === input ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformActionsParams {
    pub context: String,
    pub actions: Vec<SourceActions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseActionsParams {
    pub context: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceActions {
    None {
        id: String,
        actions: Vec<ActionItem>,
    },
    Key {
        id: String,
        actions: Vec<ActionItem>,
    },
    Pointer {
        id: String,
        #[serde(default)]
        parameters: Option<PointerParameters>,
        actions: Vec<ActionItem>,
    },
    Wheel {
        id: String,
        actions: Vec<ActionItem>,
    },
}

impl SourceActions {
    pub fn id(&self) -> &str {
        match self {
            SourceActions::None { id, .. }
            | SourceActions::Key { id, .. }
            | SourceActions::Pointer { id, .. }
            | SourceActions::Wheel { id, .. } => id,
        }
    }

    pub fn actions(&self) -> &[ActionItem] {
        match self {
            SourceActions::None { actions, .. }
            | SourceActions::Key { actions, .. }
            | SourceActions::Pointer { actions, .. }
            | SourceActions::Wheel { actions, .. } => actions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerType {
    #[default]
    Mouse,
    Pen,
    Touch,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerParameters {
    #[serde(default)]
    pub pointer_type: PointerType,
}

/// The origin a pointer move is resolved against
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Origin {
    Named(String),
    Element(Value),
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Named("viewport".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActionItem {
    Pause {
        #[serde(default)]
        duration: Option<u64>,
    },
    KeyDown {
        value: String,
    },
    KeyUp {
        value: String,
    },
    PointerDown {
        #[serde(default)]
        button: u32,
    },
    PointerUp {
        #[serde(default)]
        button: u32,
    },
    PointerMove {
        x: f64,
        y: f64,
        #[serde(default)]
        duration: Option<u64>,
        #[serde(default)]
        origin: Option<Origin>,
    },
    Scroll {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
        #[serde(default)]
        duration: Option<u64>,
        #[serde(default)]
        origin: Option<Origin>,
    },
}

// === cdp ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpSendCommandParams {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpGetSessionParams {
    pub context: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_navigate_params() {
        let params = json!({"context": "C1", "url": "http://x/", "wait": "complete"});
        let parsed: NavigateParams = parse_params(&params).unwrap();
        assert_eq!(parsed.wait, ReadinessState::Complete);
    }

    #[test]
    fn test_navigate_wait_defaults_to_none() {
        let params = json!({"context": "C1", "url": "http://x/"});
        let parsed: NavigateParams = parse_params(&params).unwrap();
        assert_eq!(parsed.wait, ReadinessState::None);
    }

    #[test]
    fn test_missing_required_field_is_invalid_argument() {
        let params = json!({"url": "http://x/"});
        let err = parse_params::<NavigateParams>(&params).unwrap_err();
        assert_eq!(err.code(), "invalid argument");
    }

    #[test]
    fn test_script_target_variants() {
        let by_realm: ScriptTarget = parse_params(&json!({"realm": "r1"})).unwrap();
        assert!(matches!(by_realm, ScriptTarget::Realm { .. }));

        let by_context: ScriptTarget =
            parse_params(&json!({"context": "C1", "sandbox": "sb"})).unwrap();
        match by_context {
            ScriptTarget::Context { context, sandbox } => {
                assert_eq!(context, "C1");
                assert_eq!(sandbox.as_deref(), Some("sb"));
            }
            _ => panic!("expected context target"),
        }
    }

    #[test]
    fn test_action_items() {
        let params = json!({
            "context": "C1",
            "actions": [{
                "type": "pointer",
                "id": "mouse1",
                "parameters": {"pointerType": "pen"},
                "actions": [
                    {"type": "pointerMove", "x": 10.0, "y": 20.0},
                    {"type": "pointerDown", "button": 0},
                    {"type": "pause", "duration": 50},
                    {"type": "pointerUp", "button": 0}
                ]
            }]
        });
        let parsed: PerformActionsParams = parse_params(&params).unwrap();
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(parsed.actions[0].actions().len(), 4);
        match &parsed.actions[0] {
            SourceActions::Pointer { parameters, .. } => {
                assert_eq!(
                    parameters.as_ref().unwrap().pointer_type,
                    PointerType::Pen
                );
            }
            _ => panic!("expected pointer source"),
        }
    }
}
