//! Command processing
//!
//! Parses inbound BiDi messages, dispatches them to a domain processor, and
//! writes the correlated response. Commands run concurrently: each message
//! gets its own task, and responses carry the originating `id` and
//! `channel` rather than arriving in submission order.

pub mod browsing_context;
pub mod cdp;
pub mod input;
pub mod script;
pub mod session;

use std::sync::Arc;

use serde_json::Value;

use crate::core::Core;
use crate::error::{Error, Result};
use crate::protocol::{build_error, build_response, parse_envelope, CommandEnvelope};

/// Inbound command dispatcher
pub struct CommandProcessor {
    core: Arc<Core>,
}

impl CommandProcessor {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Handle one raw inbound message. Returns immediately; the response is
    /// written to the outgoing channel when the command completes.
    pub fn handle_message(&self, raw: String) {
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            let wire = match parse_envelope(&raw) {
                Err(envelope_error) => {
                    tracing::debug!("Rejected message: {}", envelope_error.message);
                    build_error(
                        envelope_error.id,
                        "invalid argument",
                        &envelope_error.message,
                        None,
                        None,
                    )
                }
                Ok(envelope) => {
                    tracing::trace!("Command {} ({})", envelope.id, envelope.method);
                    let id = envelope.id;
                    let channel = envelope.channel.clone();
                    match dispatch(&core, &envelope).await {
                        Ok(result) => build_response(id, result, channel.as_deref()),
                        Err(e) => build_error(
                            Some(id),
                            e.code(),
                            &e.to_string(),
                            None,
                            channel.as_deref(),
                        ),
                    }
                }
            };
            let _ = core.out_tx.send(wire);
        });
    }
}

async fn dispatch(core: &Arc<Core>, envelope: &CommandEnvelope) -> Result<Value> {
    let method = envelope.method.as_str();
    match method.split('.').next().unwrap_or_default() {
        "session" => session::process_command(core, envelope).await,
        "browsingContext" => browsing_context::process_command(core, method, &envelope.params).await,
        "script" => script::process_command(core, method, &envelope.params).await,
        "input" => input::process_command(core, method, &envelope.params).await,
        "cdp" => cdp::process_command(core, method, &envelope.params).await,
        _ => Err(Error::UnknownCommand(method.to_string())),
    }
}
