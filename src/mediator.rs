//! Mediator wiring
//!
//! Builds the shared [`Core`], attaches to the browser, and pumps inbound
//! BiDi messages until the client channel closes. The embedder supplies the
//! four channel endpoints and the self target id from its startup
//! handshake.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::cdp::types::TargetSetAutoAttach;
use crate::cdp::CdpConnection;
use crate::core::Core;
use crate::error::Result;
use crate::processor::{browsing_context, CommandProcessor};

/// Mediator configuration supplied by the embedder
#[derive(Debug, Clone, Default)]
pub struct MediatorConfig {
    /// Target id of the tab hosting the mediator itself; it is filtered out
    /// of every response and never emits events
    pub self_target_id: String,
}

/// The BiDi ↔ CDP mediator
pub struct Mediator {
    core: Arc<Core>,
    processor: CommandProcessor,
}

impl Mediator {
    /// Wire the mediator onto its transports: outgoing BiDi strings go to
    /// `bidi_tx`, CDP strings flow through `cdp_tx`/`cdp_rx`.
    pub fn new(
        config: MediatorConfig,
        bidi_tx: mpsc::UnboundedSender<String>,
        cdp_tx: mpsc::UnboundedSender<String>,
        cdp_rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let connection = CdpConnection::new(cdp_tx, cdp_rx);
        let core = Core::new(connection, bidi_tx, config.self_target_id);
        Self {
            processor: CommandProcessor::new(Arc::clone(&core)),
            core,
        }
    }

    /// Attach to the browser and serve commands until `bidi_rx` closes.
    pub async fn run(self, mut bidi_rx: mpsc::UnboundedReceiver<String>) -> Result<()> {
        // The listener must exist before auto-attach, or the first
        // attachedToTarget is lost.
        browsing_context::spawn_browser_event_loop(&self.core);

        self.core
            .browser_client()
            .send_command::<_, Value>(
                "Target.setAutoAttach",
                &TargetSetAutoAttach {
                    auto_attach: true,
                    wait_for_debugger_on_start: true,
                    flatten: true,
                },
            )
            .await?;
        tracing::info!("Attached to browser, serving commands");

        while let Some(raw) = bidi_rx.recv().await {
            self.processor.handle_message(raw);
        }
        tracing::info!("Client channel closed, mediator stopping");
        Ok(())
    }
}
