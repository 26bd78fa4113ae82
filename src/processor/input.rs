//! Input action dispatch
//!
//! `input.performActions` decomposes action sources into ticks: tick `i`
//! holds one action from each source whose sequence is long enough. Within
//! a tick the non-pause actions dispatch in parallel, and the tick lasts at
//! least as long as its longest pause. Every dispatched action prepends its
//! inverse to the cancel list that `input.releaseActions` replays.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::cdp::types::{
    modifiers, InputDispatchKeyEvent, InputDispatchMouseEvent, InputDispatchTouchEvent, TouchPoint,
};
use crate::cdp::CdpClient;
use crate::core::Core;
use crate::error::{Error, Result};
use crate::protocol::commands::{
    parse_params, ActionItem, Origin, PerformActionsParams, PointerType, ReleaseActionsParams,
    SourceActions,
};

pub async fn process_command(core: &Arc<Core>, method: &str, params: &Value) -> Result<Value> {
    match method {
        "input.performActions" => perform_actions(core, parse_params(params)?).await,
        "input.releaseActions" => release_actions(core, parse_params(params)?).await,
        _ => Err(Error::UnknownCommand(method.to_string())),
    }
}

// === per-source state ===

#[derive(Debug)]
enum SourceState {
    None,
    Key { pressed: HashSet<String> },
    Pointer {
        subtype: PointerType,
        pressed: BTreeSet<u32>,
        x: f64,
        y: f64,
    },
    Wheel,
}

/// The inverse of a dispatched action, prepended as actions are performed
#[derive(Debug, Clone)]
enum CancelAction {
    KeyUp { source_id: String, value: String },
    PointerUp { source_id: String, button: u32 },
}

/// Input state of one top-level browsing context
#[derive(Debug, Default)]
pub struct InputState {
    sources: HashMap<String, SourceState>,
    cancel_list: Vec<CancelAction>,
}

impl InputState {
    /// Register or re-validate a source. A source id is pinned to its kind
    /// and, for pointers, to its subtype on first use.
    fn ensure_source(&mut self, source: &SourceActions) -> Result<()> {
        let id = source.id().to_string();
        match (self.sources.get(&id), source) {
            (None, SourceActions::None { .. }) => {
                self.sources.insert(id, SourceState::None);
            }
            (None, SourceActions::Key { .. }) => {
                self.sources.insert(
                    id,
                    SourceState::Key {
                        pressed: HashSet::new(),
                    },
                );
            }
            (None, SourceActions::Pointer { parameters, .. }) => {
                let subtype = parameters
                    .as_ref()
                    .map(|p| p.pointer_type)
                    .unwrap_or_default();
                self.sources.insert(
                    id,
                    SourceState::Pointer {
                        subtype,
                        pressed: BTreeSet::new(),
                        x: 0.0,
                        y: 0.0,
                    },
                );
            }
            (None, SourceActions::Wheel { .. }) => {
                self.sources.insert(id, SourceState::Wheel);
            }
            (Some(SourceState::None), SourceActions::None { .. })
            | (Some(SourceState::Key { .. }), SourceActions::Key { .. })
            | (Some(SourceState::Wheel), SourceActions::Wheel { .. }) => {}
            (Some(SourceState::Pointer { subtype, .. }), SourceActions::Pointer { parameters, .. }) => {
                let requested = parameters
                    .as_ref()
                    .map(|p| p.pointer_type)
                    .unwrap_or_default();
                if requested != *subtype {
                    return Err(Error::invalid_argument(format!(
                        "Input source {} is already a {:?} pointer",
                        source.id(),
                        subtype
                    )));
                }
            }
            (Some(_), _) => {
                return Err(Error::invalid_argument(format!(
                    "Input source {} already exists with a different type",
                    source.id()
                )));
            }
        }
        Ok(())
    }

    /// Combined CDP modifier mask over every key source
    fn modifier_mask(&self) -> i64 {
        let mut mask = 0;
        for state in self.sources.values() {
            if let SourceState::Key { pressed } = state {
                for key in pressed {
                    mask |= match key.as_str() {
                        "Alt" => modifiers::ALT,
                        "Control" => modifiers::CTRL,
                        "Meta" => modifiers::META,
                        "Shift" => modifiers::SHIFT,
                        _ => 0,
                    };
                }
            }
        }
        mask
    }

    fn pointer(&self, source_id: &str) -> Result<(PointerType, &BTreeSet<u32>, f64, f64)> {
        match self.sources.get(source_id) {
            Some(SourceState::Pointer {
                subtype,
                pressed,
                x,
                y,
            }) => Ok((*subtype, pressed, *x, *y)),
            _ => Err(Error::invalid_argument(format!(
                "Input source {} is not a pointer",
                source_id
            ))),
        }
    }
}

/// Per-top-level-context input states
#[derive(Default)]
pub struct InputStateStorage {
    states: StdMutex<HashMap<String, Arc<Mutex<InputState>>>>,
}

impl InputStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, context_id: &str) -> Arc<Mutex<InputState>> {
        self.states
            .lock()
            .unwrap()
            .entry(context_id.to_string())
            .or_default()
            .clone()
    }

    fn find(&self, context_id: &str) -> Option<Arc<Mutex<InputState>>> {
        self.states.lock().unwrap().get(context_id).cloned()
    }

    pub fn delete(&self, context_id: &str) {
        self.states.lock().unwrap().remove(context_id);
    }
}

// === key mapping ===

struct KeyInfo {
    key: String,
    code: Option<String>,
    key_code: Option<i64>,
    text: Option<String>,
}

/// Map a WebDriver key value (a printable character or a `\u{E0xx}`
/// normalized codepoint) onto CDP key event fields.
fn key_info(value: &str) -> KeyInfo {
    let special = |key: &str, code: &str, key_code: i64| KeyInfo {
        key: key.to_string(),
        code: Some(code.to_string()),
        key_code: Some(key_code),
        text: None,
    };

    let mut chars = value.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        // Multi-character values pass through as the key name.
        return KeyInfo {
            key: value.to_string(),
            code: None,
            key_code: None,
            text: None,
        };
    };

    match c {
        '\u{E003}' => special("Backspace", "Backspace", 8),
        '\u{E004}' => special("Tab", "Tab", 9),
        '\u{E006}' | '\u{E007}' => KeyInfo {
            text: Some("\r".to_string()),
            ..special("Enter", "Enter", 13)
        },
        '\u{E008}' | '\u{E050}' => special("Shift", "ShiftLeft", 16),
        '\u{E009}' | '\u{E051}' => special("Control", "ControlLeft", 17),
        '\u{E00A}' | '\u{E052}' => special("Alt", "AltLeft", 18),
        '\u{E00C}' => special("Escape", "Escape", 27),
        '\u{E00D}' => KeyInfo {
            text: Some(" ".to_string()),
            ..special(" ", "Space", 32)
        },
        '\u{E00E}' => special("PageUp", "PageUp", 33),
        '\u{E00F}' => special("PageDown", "PageDown", 34),
        '\u{E010}' => special("End", "End", 35),
        '\u{E011}' => special("Home", "Home", 36),
        '\u{E012}' => special("ArrowLeft", "ArrowLeft", 37),
        '\u{E013}' => special("ArrowUp", "ArrowUp", 38),
        '\u{E014}' => special("ArrowRight", "ArrowRight", 39),
        '\u{E015}' => special("ArrowDown", "ArrowDown", 40),
        '\u{E016}' => special("Insert", "Insert", 45),
        '\u{E017}' => special("Delete", "Delete", 46),
        '\u{E03D}' | '\u{E053}' => special("Meta", "MetaLeft", 91),
        'a'..='z' | 'A'..='Z' => {
            let upper = c.to_ascii_uppercase();
            KeyInfo {
                key: c.to_string(),
                code: Some(format!("Key{}", upper)),
                key_code: Some(upper as i64),
                text: Some(c.to_string()),
            }
        }
        '0'..='9' => KeyInfo {
            key: c.to_string(),
            code: Some(format!("Digit{}", c)),
            key_code: Some(c as i64),
            text: Some(c.to_string()),
        },
        ' ' => KeyInfo {
            text: Some(" ".to_string()),
            ..special(" ", "Space", 32)
        },
        _ => KeyInfo {
            key: c.to_string(),
            code: None,
            key_code: None,
            text: Some(c.to_string()),
        },
    }
}

fn button_name(button: u32) -> &'static str {
    match button {
        0 => "left",
        1 => "middle",
        2 => "right",
        3 => "back",
        4 => "forward",
        _ => "none",
    }
}

fn buttons_mask(pressed: &BTreeSet<u32>) -> i64 {
    pressed.iter().fold(0, |mask, button| {
        mask | match button {
            0 => 1,
            1 => 4,
            2 => 2,
            3 => 8,
            4 => 16,
            _ => 0,
        }
    })
}

// === planned CDP calls ===

#[derive(Debug, Clone)]
enum CdpCall {
    Mouse(InputDispatchMouseEvent),
    Key(InputDispatchKeyEvent),
    Touch(InputDispatchTouchEvent),
}

impl CdpCall {
    async fn dispatch(self, client: &CdpClient) -> Result<()> {
        match self {
            CdpCall::Mouse(event) => {
                client
                    .send_command::<_, Value>("Input.dispatchMouseEvent", &event)
                    .await?;
            }
            CdpCall::Key(event) => {
                client
                    .send_command::<_, Value>("Input.dispatchKeyEvent", &event)
                    .await?;
            }
            CdpCall::Touch(event) => {
                client
                    .send_command::<_, Value>("Input.dispatchTouchEvent", &event)
                    .await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Planned {
    calls: Vec<CdpCall>,
    /// Time this action contributes to the tick duration
    duration: u64,
}

fn resolve_origin(origin: &Option<Origin>, x: f64, y: f64, sx: f64, sy: f64) -> Result<(f64, f64)> {
    match origin.as_ref().unwrap_or(&Origin::Named("viewport".to_string())) {
        Origin::Named(name) if name == "viewport" => Ok((x, y)),
        Origin::Named(name) if name == "pointer" => Ok((sx + x, sy + y)),
        Origin::Named(name) => Err(Error::invalid_argument(format!(
            "Unknown origin {}",
            name
        ))),
        Origin::Element(_) => Err(Error::UnsupportedOperation(
            "Element origins are not supported".to_string(),
        )),
    }
}

/// Build the CDP calls for one action against the pre-tick state
fn plan_action(state: &InputState, source_id: &str, action: &ActionItem) -> Result<Planned> {
    let modifier_mask = state.modifier_mask();
    match action {
        ActionItem::Pause { .. } => Ok(Planned {
            calls: Vec::new(),
            duration: 0,
        }),
        ActionItem::KeyDown { value } => {
            let info = key_info(value);
            Ok(Planned {
                calls: vec![CdpCall::Key(InputDispatchKeyEvent {
                    r#type: "keyDown".to_string(),
                    modifiers: Some(modifier_mask),
                    text: info.text.clone(),
                    unmodified_text: info.text,
                    key: Some(info.key),
                    code: info.code,
                    windows_virtual_key_code: info.key_code,
                })],
                duration: 0,
            })
        }
        ActionItem::KeyUp { value } => {
            let info = key_info(value);
            Ok(Planned {
                calls: vec![CdpCall::Key(InputDispatchKeyEvent {
                    r#type: "keyUp".to_string(),
                    modifiers: Some(modifier_mask),
                    text: None,
                    unmodified_text: None,
                    key: Some(info.key),
                    code: info.code,
                    windows_virtual_key_code: info.key_code,
                })],
                duration: 0,
            })
        }
        ActionItem::PointerDown { button } => {
            let (subtype, pressed, x, y) = state.pointer(source_id)?;
            if subtype == PointerType::Touch {
                return Ok(Planned {
                    calls: vec![CdpCall::Touch(InputDispatchTouchEvent {
                        r#type: "touchStart".to_string(),
                        touch_points: vec![TouchPoint { x, y }],
                        modifiers: Some(modifier_mask),
                    })],
                    duration: 0,
                });
            }
            let mut after = pressed.clone();
            after.insert(*button);
            Ok(Planned {
                calls: vec![CdpCall::Mouse(InputDispatchMouseEvent {
                    r#type: "mousePressed".to_string(),
                    x,
                    y,
                    modifiers: Some(modifier_mask),
                    button: Some(button_name(*button).to_string()),
                    buttons: Some(buttons_mask(&after)),
                    click_count: Some(1),
                    delta_x: None,
                    delta_y: None,
                    pointer_type: pointer_type_name(subtype),
                })],
                duration: 0,
            })
        }
        ActionItem::PointerUp { button } => {
            let (subtype, pressed, x, y) = state.pointer(source_id)?;
            if subtype == PointerType::Touch {
                return Ok(Planned {
                    calls: vec![CdpCall::Touch(InputDispatchTouchEvent {
                        r#type: "touchEnd".to_string(),
                        touch_points: Vec::new(),
                        modifiers: Some(modifier_mask),
                    })],
                    duration: 0,
                });
            }
            let mut after = pressed.clone();
            after.remove(button);
            Ok(Planned {
                calls: vec![CdpCall::Mouse(InputDispatchMouseEvent {
                    r#type: "mouseReleased".to_string(),
                    x,
                    y,
                    modifiers: Some(modifier_mask),
                    button: Some(button_name(*button).to_string()),
                    buttons: Some(buttons_mask(&after)),
                    click_count: Some(1),
                    delta_x: None,
                    delta_y: None,
                    pointer_type: pointer_type_name(subtype),
                })],
                duration: 0,
            })
        }
        ActionItem::PointerMove {
            x,
            y,
            duration,
            origin,
        } => {
            let (subtype, pressed, sx, sy) = state.pointer(source_id)?;
            let (tx, ty) = resolve_origin(origin, *x, *y, sx, sy)?;
            let call = if subtype == PointerType::Touch {
                CdpCall::Touch(InputDispatchTouchEvent {
                    r#type: "touchMove".to_string(),
                    touch_points: vec![TouchPoint { x: tx, y: ty }],
                    modifiers: Some(modifier_mask),
                })
            } else {
                CdpCall::Mouse(InputDispatchMouseEvent {
                    r#type: "mouseMoved".to_string(),
                    x: tx,
                    y: ty,
                    modifiers: Some(modifier_mask),
                    button: Some("none".to_string()),
                    buttons: Some(buttons_mask(pressed)),
                    click_count: None,
                    delta_x: None,
                    delta_y: None,
                    pointer_type: pointer_type_name(subtype),
                })
            };
            Ok(Planned {
                calls: vec![call],
                duration: duration.unwrap_or(0),
            })
        }
        ActionItem::Scroll {
            x,
            y,
            delta_x,
            delta_y,
            duration,
            origin,
        } => {
            let (tx, ty) = resolve_origin(origin, *x, *y, 0.0, 0.0)?;
            Ok(Planned {
                calls: vec![CdpCall::Mouse(InputDispatchMouseEvent {
                    r#type: "mouseWheel".to_string(),
                    x: tx,
                    y: ty,
                    modifiers: Some(modifier_mask),
                    button: None,
                    buttons: None,
                    click_count: None,
                    delta_x: Some(*delta_x),
                    delta_y: Some(*delta_y),
                    pointer_type: None,
                })],
                duration: duration.unwrap_or(0),
            })
        }
    }
}

/// Mutate source state after an action dispatched, prepending the inverse
fn apply_action(state: &mut InputState, source_id: &str, action: &ActionItem) {
    match action {
        ActionItem::KeyDown { value } => {
            let key = key_info(value).key;
            if let Some(SourceState::Key { pressed }) = state.sources.get_mut(source_id) {
                pressed.insert(key);
            }
            state.cancel_list.insert(
                0,
                CancelAction::KeyUp {
                    source_id: source_id.to_string(),
                    value: value.clone(),
                },
            );
        }
        ActionItem::KeyUp { value } => {
            let key = key_info(value).key;
            if let Some(SourceState::Key { pressed }) = state.sources.get_mut(source_id) {
                pressed.remove(&key);
            }
        }
        ActionItem::PointerDown { button } => {
            if let Some(SourceState::Pointer { pressed, .. }) = state.sources.get_mut(source_id) {
                pressed.insert(*button);
            }
            state.cancel_list.insert(
                0,
                CancelAction::PointerUp {
                    source_id: source_id.to_string(),
                    button: *button,
                },
            );
        }
        ActionItem::PointerUp { button } => {
            if let Some(SourceState::Pointer { pressed, .. }) = state.sources.get_mut(source_id) {
                pressed.remove(button);
            }
        }
        ActionItem::PointerMove { .. } => {
            // The target position was resolved at plan time against the old
            // position; recompute it the same way here.
        }
        ActionItem::Pause { .. } | ActionItem::Scroll { .. } => {}
    }
}

fn apply_pointer_move(state: &mut InputState, source_id: &str, x: f64, y: f64) {
    if let Some(SourceState::Pointer {
        x: sx, y: sy, ..
    }) = state.sources.get_mut(source_id)
    {
        *sx = x;
        *sy = y;
    }
}

fn pointer_type_name(subtype: PointerType) -> Option<String> {
    match subtype {
        PointerType::Mouse => Some("mouse".to_string()),
        PointerType::Pen => Some("pen".to_string()),
        PointerType::Touch => None,
    }
}

// === commands ===

async fn perform_actions(core: &Arc<Core>, params: PerformActionsParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.await_unblocked().await?;
    let top_level = core.contexts.top_level_ancestor(context.id())?;
    let client = context.target().client().clone();

    let state_cell = core.input.get_or_create(top_level.id());
    let mut state = state_cell.lock().await;

    for source in &params.actions {
        state.ensure_source(source)?;
    }

    let tick_count = params
        .actions
        .iter()
        .map(|s| s.actions().len())
        .max()
        .unwrap_or(0);

    for tick in 0..tick_count {
        let mut tick_duration: u64 = 0;
        let mut calls = Vec::new();
        let mut performed: Vec<(String, ActionItem)> = Vec::new();

        for source in &params.actions {
            let Some(action) = source.actions().get(tick) else {
                continue;
            };
            if let ActionItem::Pause { duration } = action {
                tick_duration = tick_duration.max(duration.unwrap_or(0));
                continue;
            }
            let planned = plan_action(&state, source.id(), action)?;
            tick_duration = tick_duration.max(planned.duration);
            calls.extend(planned.calls);
            performed.push((source.id().to_string(), action.clone()));
        }

        // Dispatch concurrently; the tick resolves once every action
        // completed and its wall clock covered the longest pause.
        let started = tokio::time::Instant::now();
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            let client = client.clone();
            handles.push(tokio::spawn(async move { call.dispatch(&client).await }));
        }
        for handle in handles {
            handle.await.map_err(|e| Error::unknown(e.to_string()))??;
        }
        let pause = Duration::from_millis(tick_duration);
        let elapsed = started.elapsed();
        if elapsed < pause {
            tokio::time::sleep(pause - elapsed).await;
        }

        for (source_id, action) in performed {
            if let ActionItem::PointerMove { x, y, ref origin, .. } = action {
                let (_, _, sx, sy) = state.pointer(&source_id)?;
                let (tx, ty) = resolve_origin(origin, x, y, sx, sy)?;
                apply_pointer_move(&mut state, &source_id, tx, ty);
            }
            apply_action(&mut state, &source_id, &action);
        }
    }

    Ok(json!({}))
}

async fn release_actions(core: &Arc<Core>, params: ReleaseActionsParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.await_unblocked().await?;
    let top_level = core.contexts.top_level_ancestor(context.id())?;
    let client = context.target().client().clone();

    let Some(state_cell) = core.input.find(top_level.id()) else {
        return Ok(json!({}));
    };
    {
        let mut state = state_cell.lock().await;
        // Newest first: the cancel list was built by prepending.
        let cancels = state.cancel_list.clone();
        for cancel in cancels {
            let (source_id, action) = match cancel {
                CancelAction::KeyUp { source_id, value } => {
                    (source_id, ActionItem::KeyUp { value })
                }
                CancelAction::PointerUp { source_id, button } => {
                    (source_id, ActionItem::PointerUp { button })
                }
            };
            let planned = plan_action(&state, &source_id, &action)?;
            for call in planned.calls {
                call.dispatch(&client).await?;
            }
            apply_action(&mut state, &source_id, &action);
        }
    }
    core.input.delete(top_level.id());
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::PointerParameters;

    fn pointer_source(id: &str, pointer_type: PointerType) -> SourceActions {
        SourceActions::Pointer {
            id: id.to_string(),
            parameters: Some(PointerParameters { pointer_type }),
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_pointer_subtype_is_pinned() {
        let mut state = InputState::default();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();

        let err = state
            .ensure_source(&pointer_source("p1", PointerType::Touch))
            .unwrap_err();
        assert_eq!(err.code(), "invalid argument");
    }

    #[test]
    fn test_source_kind_conflict() {
        let mut state = InputState::default();
        state
            .ensure_source(&SourceActions::Key {
                id: "s1".to_string(),
                actions: Vec::new(),
            })
            .unwrap();
        let err = state
            .ensure_source(&pointer_source("s1", PointerType::Mouse))
            .unwrap_err();
        assert_eq!(err.code(), "invalid argument");
    }

    #[test]
    fn test_modifier_mask_tracks_pressed_keys() {
        let mut state = InputState::default();
        state
            .ensure_source(&SourceActions::Key {
                id: "kbd".to_string(),
                actions: Vec::new(),
            })
            .unwrap();
        assert_eq!(state.modifier_mask(), 0);

        apply_action(
            &mut state,
            "kbd",
            &ActionItem::KeyDown {
                value: "\u{E008}".to_string(),
            },
        );
        assert_eq!(state.modifier_mask(), modifiers::SHIFT);

        apply_action(
            &mut state,
            "kbd",
            &ActionItem::KeyUp {
                value: "\u{E008}".to_string(),
            },
        );
        assert_eq!(state.modifier_mask(), 0);
    }

    #[test]
    fn test_cancel_list_prepends_inverses() {
        let mut state = InputState::default();
        state
            .ensure_source(&SourceActions::Key {
                id: "kbd".to_string(),
                actions: Vec::new(),
            })
            .unwrap();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();

        apply_action(
            &mut state,
            "kbd",
            &ActionItem::KeyDown {
                value: "a".to_string(),
            },
        );
        apply_action(&mut state, "p1", &ActionItem::PointerDown { button: 0 });

        // Newest first.
        assert!(matches!(
            state.cancel_list[0],
            CancelAction::PointerUp { .. }
        ));
        assert!(matches!(state.cancel_list[1], CancelAction::KeyUp { .. }));
    }

    #[test]
    fn test_plan_key_down_event() {
        let mut state = InputState::default();
        state
            .ensure_source(&SourceActions::Key {
                id: "kbd".to_string(),
                actions: Vec::new(),
            })
            .unwrap();

        let planned = plan_action(
            &state,
            "kbd",
            &ActionItem::KeyDown {
                value: "a".to_string(),
            },
        )
        .unwrap();
        assert_eq!(planned.calls.len(), 1);
        match &planned.calls[0] {
            CdpCall::Key(event) => {
                assert_eq!(event.r#type, "keyDown");
                assert_eq!(event.key.as_deref(), Some("a"));
                assert_eq!(event.code.as_deref(), Some("KeyA"));
                assert_eq!(event.text.as_deref(), Some("a"));
                assert_eq!(event.windows_virtual_key_code, Some('A' as i64));
            }
            _ => panic!("expected key event"),
        }
    }

    #[test]
    fn test_plan_pointer_down_uses_current_position() {
        let mut state = InputState::default();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();
        apply_pointer_move(&mut state, "p1", 10.0, 20.0);

        let planned = plan_action(&state, "p1", &ActionItem::PointerDown { button: 2 }).unwrap();
        match &planned.calls[0] {
            CdpCall::Mouse(event) => {
                assert_eq!(event.r#type, "mousePressed");
                assert_eq!(event.x, 10.0);
                assert_eq!(event.y, 20.0);
                assert_eq!(event.button.as_deref(), Some("right"));
                assert_eq!(event.buttons, Some(2));
            }
            _ => panic!("expected mouse event"),
        }
    }

    #[test]
    fn test_pointer_origin_relative_to_pointer() {
        let mut state = InputState::default();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();
        apply_pointer_move(&mut state, "p1", 100.0, 100.0);

        let planned = plan_action(
            &state,
            "p1",
            &ActionItem::PointerMove {
                x: 5.0,
                y: -5.0,
                duration: None,
                origin: Some(Origin::Named("pointer".to_string())),
            },
        )
        .unwrap();
        match &planned.calls[0] {
            CdpCall::Mouse(event) => {
                assert_eq!(event.x, 105.0);
                assert_eq!(event.y, 95.0);
            }
            _ => panic!("expected mouse event"),
        }
    }

    #[test]
    fn test_element_origin_unsupported() {
        let mut state = InputState::default();
        state
            .ensure_source(&pointer_source("p1", PointerType::Mouse))
            .unwrap();
        let err = plan_action(
            &state,
            "p1",
            &ActionItem::PointerMove {
                x: 0.0,
                y: 0.0,
                duration: None,
                origin: Some(Origin::Element(json!({"sharedId": "x"}))),
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "unsupported operation");
    }

    #[test]
    fn test_touch_pointer_plans_touch_events() {
        let mut state = InputState::default();
        state
            .ensure_source(&pointer_source("finger", PointerType::Touch))
            .unwrap();
        apply_pointer_move(&mut state, "finger", 3.0, 4.0);

        let planned =
            plan_action(&state, "finger", &ActionItem::PointerDown { button: 0 }).unwrap();
        match &planned.calls[0] {
            CdpCall::Touch(event) => {
                assert_eq!(event.r#type, "touchStart");
                assert_eq!(event.touch_points.len(), 1);
                assert_eq!(event.touch_points[0].x, 3.0);
            }
            _ => panic!("expected touch event"),
        }
    }
}
