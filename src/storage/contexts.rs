//! Browsing context store
//!
//! Tree of contexts keyed by frame id, plus waiters used by commands that
//! block on a context appearing (create) or disappearing (close).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::context::BrowsingContext;
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    contexts: HashMap<String, Arc<BrowsingContext>>,
    create_waiters: HashMap<String, Vec<oneshot::Sender<()>>>,
    delete_waiters: HashMap<String, Vec<oneshot::Sender<()>>>,
}

/// All live browsing contexts
#[derive(Default)]
pub struct BrowsingContextStorage {
    state: Mutex<State>,
}

impl BrowsingContextStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_context(&self, id: &str) -> Option<Arc<BrowsingContext>> {
        self.state.lock().unwrap().contexts.get(id).cloned()
    }

    pub fn get_context(&self, id: &str) -> Result<Arc<BrowsingContext>> {
        self.find_context(id)
            .ok_or_else(|| Error::NoSuchFrame(id.to_string()))
    }

    pub fn has_context(&self, id: &str) -> bool {
        self.state.lock().unwrap().contexts.contains_key(id)
    }

    pub fn top_level_contexts(&self) -> Vec<Arc<BrowsingContext>> {
        let mut contexts: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .contexts
            .values()
            .filter(|c| c.is_top_level())
            .cloned()
            .collect();
        contexts.sort_by(|a, b| a.id().cmp(b.id()));
        contexts
    }

    pub fn children_of(&self, id: &str) -> Vec<Arc<BrowsingContext>> {
        let mut children: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .contexts
            .values()
            .filter(|c| c.parent_id() == Some(id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id().cmp(b.id()));
        children
    }

    /// The top-level ancestor of a context
    pub fn top_level_ancestor(&self, id: &str) -> Result<Arc<BrowsingContext>> {
        let mut current = self.get_context(id)?;
        while let Some(parent_id) = current.parent_id().map(String::from) {
            current = self.get_context(&parent_id)?;
        }
        Ok(current)
    }

    pub fn add_context(&self, context: Arc<BrowsingContext>) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            let id = context.id().to_string();
            state.contexts.insert(id.clone(), context);
            state.create_waiters.remove(&id).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Remove a context and every descendant. Returns the removed contexts,
    /// children before parents.
    pub fn delete_subtree(&self, id: &str) -> Vec<Arc<BrowsingContext>> {
        let mut state = self.state.lock().unwrap();

        let mut removed = Vec::new();
        collect_subtree(&state.contexts, id, &mut removed);
        let mut waiters = Vec::new();
        for context in &removed {
            state.contexts.remove(context.id());
            if let Some(pending) = state.delete_waiters.remove(context.id()) {
                waiters.extend(pending);
            }
        }
        drop(state);

        for waiter in waiters {
            let _ = waiter.send(());
        }
        removed
    }

    /// Wait until a context with this id exists
    pub async fn await_context(&self, id: &str) -> Result<Arc<BrowsingContext>> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if let Some(context) = state.contexts.get(id) {
                return Ok(Arc::clone(context));
            }
            let (tx, rx) = oneshot::channel();
            state.create_waiters.entry(id.to_string()).or_default().push(tx);
            rx
        };
        rx.await
            .map_err(|_| Error::unknown("context storage dropped"))?;
        self.get_context(id)
    }

    /// Wait until the context with this id has been removed
    pub async fn await_deleted(&self, id: &str) -> Result<()> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if !state.contexts.contains_key(id) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.delete_waiters.entry(id.to_string()).or_default().push(tx);
            rx
        };
        rx.await
            .map_err(|_| Error::unknown("context storage dropped"))
    }
}

fn collect_subtree(
    contexts: &HashMap<String, Arc<BrowsingContext>>,
    id: &str,
    out: &mut Vec<Arc<BrowsingContext>>,
) {
    let children: Vec<String> = contexts
        .values()
        .filter(|c| c.parent_id() == Some(id))
        .map(|c| c.id().to_string())
        .collect();
    for child in children {
        collect_subtree(contexts, &child, out);
    }
    if let Some(context) = contexts.get(id) {
        out.push(Arc::clone(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CdpConnection;
    use crate::target::CdpTarget;
    use tokio::sync::mpsc;

    fn target(session: &str) -> Arc<CdpTarget> {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);
        CdpTarget::new(session, session, connection.session_client(session))
    }

    fn context(id: &str, parent: Option<&str>) -> Arc<BrowsingContext> {
        BrowsingContext::new(id, parent.map(String::from), "about:blank", target(id))
    }

    #[tokio::test]
    async fn test_get_context_missing_is_no_such_frame() {
        let storage = BrowsingContextStorage::new();
        let err = storage.get_context("nope").unwrap_err();
        assert_eq!(err.code(), "no such frame");
    }

    #[tokio::test]
    async fn test_top_level_enumeration() {
        let storage = BrowsingContextStorage::new();
        storage.add_context(context("C1", None));
        storage.add_context(context("C2", None));
        storage.add_context(context("C1.1", Some("C1")));

        let top: Vec<String> = storage
            .top_level_contexts()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(top, vec!["C1", "C2"]);
    }

    #[tokio::test]
    async fn test_delete_subtree_children_first() {
        let storage = BrowsingContextStorage::new();
        storage.add_context(context("C1", None));
        storage.add_context(context("C1.1", Some("C1")));
        storage.add_context(context("C1.1.1", Some("C1.1")));
        storage.add_context(context("C2", None));

        let removed: Vec<String> = storage
            .delete_subtree("C1")
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(removed, vec!["C1.1.1", "C1.1", "C1"]);
        assert!(!storage.has_context("C1.1"));
        assert!(storage.has_context("C2"));
    }

    #[tokio::test]
    async fn test_await_context_resolves_on_add() {
        let storage = Arc::new(BrowsingContextStorage::new());
        let waiter = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.await_context("C1").await })
        };
        tokio::task::yield_now().await;
        storage.add_context(context("C1", None));
        assert_eq!(waiter.await.unwrap().unwrap().id(), "C1");
    }

    #[tokio::test]
    async fn test_await_deleted_resolves_on_delete() {
        let storage = Arc::new(BrowsingContextStorage::new());
        storage.add_context(context("C1", None));
        let waiter = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.await_deleted("C1").await })
        };
        tokio::task::yield_now().await;
        storage.delete_subtree("C1");
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_top_level_ancestor() {
        let storage = BrowsingContextStorage::new();
        storage.add_context(context("C1", None));
        storage.add_context(context("C1.1", Some("C1")));
        storage.add_context(context("C1.1.1", Some("C1.1")));

        let top = storage.top_level_ancestor("C1.1.1").unwrap();
        assert_eq!(top.id(), "C1");
    }
}
