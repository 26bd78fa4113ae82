//! Session domain: status and event subscriptions

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::Core;
use crate::error::{Error, Result};
use crate::protocol::commands::{parse_params, SubscribeParams};
use crate::protocol::CommandEnvelope;

pub async fn process_command(core: &Arc<Core>, envelope: &CommandEnvelope) -> Result<Value> {
    match envelope.method.as_str() {
        // A single-client mediator: being connected means no capacity for
        // another session.
        "session.status" => Ok(json!({ "ready": false, "message": "already connected" })),
        "session.subscribe" => {
            let params: SubscribeParams = parse_params(&envelope.params)?;
            validate_contexts(core, &params)?;
            core.events.subscribe(
                &params.events,
                params.contexts.as_deref(),
                envelope.channel.as_deref(),
            );
            Ok(json!({}))
        }
        "session.unsubscribe" => {
            let params: SubscribeParams = parse_params(&envelope.params)?;
            validate_contexts(core, &params)?;
            core.events.unsubscribe(
                &params.events,
                params.contexts.as_deref(),
                envelope.channel.as_deref(),
            );
            Ok(json!({}))
        }
        method => Err(Error::UnknownCommand(method.to_string())),
    }
}

fn validate_contexts(core: &Arc<Core>, params: &SubscribeParams) -> Result<()> {
    if let Some(contexts) = &params.contexts {
        for context in contexts {
            core.contexts.get_context(context)?;
        }
    }
    Ok(())
}
