//! CDP target setup
//!
//! One [`CdpTarget`] per attached browser target. Owns the session client
//! and the "unblocked" gate that holds back every operation until the
//! target's CDP domains are enabled and its debugger pause is released.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::cdp::types::{
    PageEnable, PageSetLifecycleEventsEnabled, RuntimeEnable, RuntimeRunIfWaitingForDebugger,
    TargetSetAutoAttach,
};
use crate::cdp::CdpClient;
use crate::error::{Error, Result};
use crate::storage::preload::PreloadScriptStorage;

#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// An attached CDP target and its session
pub struct CdpTarget {
    target_id: String,
    session_id: String,
    client: CdpClient,
    readiness_tx: watch::Sender<Readiness>,
}

impl CdpTarget {
    pub fn new(
        target_id: impl Into<String>,
        session_id: impl Into<String>,
        client: CdpClient,
    ) -> Arc<Self> {
        Arc::new(Self {
            target_id: target_id.into(),
            session_id: session_id.into(),
            client,
            readiness_tx: watch::channel(Readiness::Pending).0,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    /// Wait until the enable sequence finished. Errors if it failed.
    pub async fn await_unblocked(&self) -> Result<()> {
        let mut rx = self.readiness_tx.subscribe();
        loop {
            match &*rx.borrow() {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(message) => return Err(Error::unknown(message.clone())),
                Readiness::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::unknown("target setup abandoned"));
            }
        }
    }

    /// Run the attach sequence: enable the CDP domains, install the preload
    /// scripts that apply to this target, then release the debugger pause.
    ///
    /// The caller must have registered its event listeners on the session
    /// before calling this, or early `Runtime`/`Page` events are lost.
    pub async fn init(
        self: &Arc<Self>,
        preload: &PreloadScriptStorage,
        top_level_context: &str,
    ) -> Result<()> {
        let result = self.init_inner(preload, top_level_context).await;
        let readiness = match &result {
            Ok(()) => Readiness::Ready,
            Err(e) => Readiness::Failed(e.to_string()),
        };
        let _ = self.readiness_tx.send(readiness);
        result
    }

    async fn init_inner(
        self: &Arc<Self>,
        preload: &PreloadScriptStorage,
        top_level_context: &str,
    ) -> Result<()> {
        tokio::try_join!(
            self.client
                .send_command::<_, Value>("Page.enable", &PageEnable {}),
            self.client
                .send_command::<_, Value>("Runtime.enable", &RuntimeEnable {}),
            self.client.send_command::<_, Value>(
                "Page.setLifecycleEventsEnabled",
                &PageSetLifecycleEventsEnabled { enabled: true },
            ),
            // Nested targets (OOPIFs) attach through this session.
            self.client.send_command::<_, Value>(
                "Target.setAutoAttach",
                &TargetSetAutoAttach {
                    auto_attach: true,
                    wait_for_debugger_on_start: true,
                    flatten: true,
                },
            ),
        )?;

        preload.install_on_target(self, top_level_context).await?;

        self.client
            .send_command::<_, Value>(
                "Runtime.runIfWaitingForDebugger",
                &RuntimeRunIfWaitingForDebugger {},
            )
            .await?;

        tracing::debug!(
            "Target {} (session {}) unblocked",
            self.target_id,
            self.session_id
        );
        Ok(())
    }
}
