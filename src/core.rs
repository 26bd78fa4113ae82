//! Shared collaborators
//!
//! The storages, the CDP connection, and the event manager are singletons
//! scoped to one mediator. They are threaded through as one [`Core`] handle
//! instead of globals.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cdp::{CdpClient, CdpConnection};
use crate::events::EventManager;
use crate::processor::input::InputStateStorage;
use crate::storage::{BrowsingContextStorage, PreloadScriptStorage, RealmStorage};

/// The mediator's shared state and collaborators
pub struct Core {
    pub connection: Arc<CdpConnection>,
    pub contexts: BrowsingContextStorage,
    pub realms: RealmStorage,
    pub preload: PreloadScriptStorage,
    pub events: EventManager,
    pub input: InputStateStorage,
    /// Outgoing BiDi wire; shared with the event manager so responses and
    /// events interleave in emission order
    pub out_tx: mpsc::UnboundedSender<String>,
    /// The mediator's own hosting tab, filtered out of everything
    pub self_target_id: String,
}

impl Core {
    pub fn new(
        connection: Arc<CdpConnection>,
        out_tx: mpsc::UnboundedSender<String>,
        self_target_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            contexts: BrowsingContextStorage::new(),
            realms: RealmStorage::new(),
            preload: PreloadScriptStorage::new(),
            events: EventManager::new(out_tx.clone()),
            input: InputStateStorage::new(),
            out_tx,
            self_target_id,
        })
    }

    pub fn browser_client(&self) -> CdpClient {
        self.connection.browser_client()
    }

    pub fn session_client(&self, session_id: &str) -> CdpClient {
        self.connection.session_client(session_id)
    }
}
