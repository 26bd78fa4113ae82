//! CDP passthrough domain
//!
//! Raw access to the underlying protocol for clients that need commands the
//! BiDi surface does not cover.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::core::Core;
use crate::error::{Error, Result};
use crate::protocol::commands::{parse_params, CdpGetSessionParams, CdpSendCommandParams};

pub async fn process_command(core: &Arc<Core>, method: &str, params: &Value) -> Result<Value> {
    match method {
        "cdp.sendCommand" => send_command(core, parse_params(params)?).await,
        "cdp.getSession" => get_session(core, parse_params(params)?),
        _ => Err(Error::UnknownCommand(method.to_string())),
    }
}

async fn send_command(core: &Arc<Core>, params: CdpSendCommandParams) -> Result<Value> {
    let client = match &params.session {
        Some(session) => core.session_client(session),
        None => core.browser_client(),
    };
    let result = client
        .send_command_raw(&params.method, params.params.unwrap_or_else(|| json!({})))
        .await?;

    let mut response = Map::new();
    response.insert("result".to_string(), result);
    if let Some(session) = params.session {
        response.insert("session".to_string(), json!(session));
    }
    Ok(Value::Object(response))
}

fn get_session(core: &Arc<Core>, params: CdpGetSessionParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    Ok(json!({ "session": context.target().session_id() }))
}
