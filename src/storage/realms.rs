//! Realm store and handle ownership
//!
//! Realms indexed by id, context, and session, plus the map recording which
//! realm granted each remote object handle. Destroying a realm purges its
//! handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::realm::{Realm, RealmType};

/// Sandbox dimension of a realm filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SandboxFilter {
    /// Any realm regardless of sandbox
    #[default]
    Any,
    /// Only the principal (non-sandboxed) realm
    Principal,
    /// Only the sandbox with this name
    Named(String),
}

/// Filter for realm lookups; unset dimensions match everything
#[derive(Debug, Clone, Default)]
pub struct RealmFilter {
    pub context_id: Option<String>,
    pub realm_type: Option<RealmType>,
    pub session_id: Option<String>,
    pub sandbox: SandboxFilter,
}

impl RealmFilter {
    fn matches(&self, realm: &Realm) -> bool {
        if let Some(context_id) = &self.context_id {
            if realm.context_id() != context_id {
                return false;
            }
        }
        if let Some(realm_type) = self.realm_type {
            if realm.realm_type() != realm_type {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if realm.session_id() != Some(session_id.as_str()) {
                return false;
            }
        }
        match &self.sandbox {
            SandboxFilter::Any => true,
            SandboxFilter::Principal => realm.sandbox().is_none(),
            SandboxFilter::Named(name) => realm.sandbox() == Some(name.as_str()),
        }
    }
}

#[derive(Default)]
struct State {
    realms: HashMap<String, Arc<Realm>>,
    /// handle -> owning realm id
    handles: HashMap<String, String>,
}

/// All live realms and the handles they granted
#[derive(Default)]
pub struct RealmStorage {
    state: Mutex<State>,
    /// Pinged on every insertion; lets commands wait for a realm the
    /// browser has not announced yet
    added: Notify,
}

impl RealmStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a realm. Deduplicates on (session, execution context id), so
    /// the event handler and an on-demand sandbox creation racing each other
    /// agree on one realm; returns the stored one.
    pub fn add_realm(&self, realm: Arc<Realm>) -> Arc<Realm> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.realms.values().find(|r| {
            r.session_id() == realm.session_id()
                && r.execution_context_id() == realm.execution_context_id()
        }) {
            return Arc::clone(existing);
        }
        state
            .realms
            .insert(realm.realm_id().to_string(), Arc::clone(&realm));
        drop(state);
        self.added.notify_waiters();
        realm
    }

    pub fn find_realm_by_id(&self, realm_id: &str) -> Option<Arc<Realm>> {
        self.state.lock().unwrap().realms.get(realm_id).cloned()
    }

    pub fn find_realms(&self, filter: &RealmFilter) -> Vec<Arc<Realm>> {
        let mut realms: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .realms
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        realms.sort_by(|a, b| a.realm_id().cmp(b.realm_id()));
        realms
    }

    /// Exactly one realm for the filter: zero matches is `NoSuchRealm`, more
    /// than one is an ambiguity error.
    pub fn get_realm(&self, filter: &RealmFilter) -> Result<Arc<Realm>> {
        let mut matches = self.find_realms(filter);
        match matches.len() {
            0 => Err(Error::NoSuchRealm(format!("{:?}", filter))),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::invalid_argument(format!(
                "Multiple realms match {:?}",
                filter
            ))),
        }
    }

    /// Like [`get_realm`](Self::get_realm), but waits for the realm to
    /// appear instead of failing on zero matches. Execution context
    /// announcements race command dispatch, so a context's principal realm
    /// may arrive a moment after the context itself became operational.
    pub async fn await_realm(&self, filter: &RealmFilter) -> Result<Arc<Realm>> {
        loop {
            let notified = self.added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut matches = self.find_realms(filter);
            match matches.len() {
                0 => {}
                1 => return Ok(matches.remove(0)),
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "Multiple realms match {:?}",
                        filter
                    )))
                }
            }
            notified.await;
        }
    }

    /// The realm backing a CDP execution context on a session
    pub fn find_by_execution_context(
        &self,
        session_id: &str,
        execution_context_id: i64,
    ) -> Option<Arc<Realm>> {
        self.state
            .lock()
            .unwrap()
            .realms
            .values()
            .find(|r| {
                r.session_id() == Some(session_id)
                    && r.execution_context_id() == execution_context_id
            })
            .cloned()
    }

    /// Remove one realm and every handle it granted
    pub fn delete_realm(&self, realm_id: &str) {
        let mut state = self.state.lock().unwrap();
        if state.realms.remove(realm_id).is_none() {
            return;
        }
        state.handles.retain(|_, owner| owner != realm_id);
        tracing::debug!("Realm {} deleted", realm_id);
    }

    /// Remove all realms matching the filter. Returns how many were removed.
    pub fn delete_realms(&self, filter: &RealmFilter) -> usize {
        let ids: Vec<String> = self
            .find_realms(filter)
            .iter()
            .map(|r| r.realm_id().to_string())
            .collect();
        for id in &ids {
            self.delete_realm(id);
        }
        ids.len()
    }

    pub fn register_handle(&self, handle: &str, realm_id: &str) {
        self.state
            .lock()
            .unwrap()
            .handles
            .insert(handle.to_string(), realm_id.to_string());
    }

    pub fn realm_for_handle(&self, handle: &str) -> Option<String> {
        self.state.lock().unwrap().handles.get(handle).cloned()
    }

    pub fn remove_handle(&self, handle: &str) {
        self.state.lock().unwrap().handles.remove(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CdpConnection;
    use crate::realm::new_realm_id;
    use tokio::sync::mpsc;

    fn realm(id: &str, context: &str, session: &str, sandbox: Option<&str>) -> Arc<Realm> {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);
        Realm::new(
            id.to_string(),
            context.to_string(),
            1,
            "http://example.com".to_string(),
            RealmType::Window,
            sandbox.map(String::from),
            "L1".to_string(),
            connection.session_client(session),
        )
    }

    #[tokio::test]
    async fn test_get_realm_principal_vs_sandbox() {
        let storage = RealmStorage::new();
        storage.add_realm(realm("r1", "C1", "S1", None));
        storage.add_realm(realm("r2", "C1", "S1", Some("sb")));

        let principal = storage
            .get_realm(&RealmFilter {
                context_id: Some("C1".to_string()),
                sandbox: SandboxFilter::Principal,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(principal.realm_id(), "r1");

        let sandbox = storage
            .get_realm(&RealmFilter {
                context_id: Some("C1".to_string()),
                sandbox: SandboxFilter::Named("sb".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sandbox.realm_id(), "r2");
    }

    #[tokio::test]
    async fn test_get_realm_no_match_and_ambiguous() {
        let storage = RealmStorage::new();
        let missing = storage
            .get_realm(&RealmFilter {
                context_id: Some("C9".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(missing.code(), "invalid argument");

        storage.add_realm(realm("r1", "C1", "S1", None));
        storage.add_realm(realm("r2", "C1", "S1", Some("sb")));
        let ambiguous = storage
            .get_realm(&RealmFilter {
                context_id: Some("C1".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(ambiguous.code(), "invalid argument");
    }

    #[tokio::test]
    async fn test_delete_realm_purges_handles() {
        let storage = RealmStorage::new();
        storage.add_realm(realm("r1", "C1", "S1", None));
        storage.add_realm(realm("r2", "C2", "S2", None));
        storage.register_handle("h1", "r1");
        storage.register_handle("h2", "r2");

        storage.delete_realm("r1");
        assert!(storage.realm_for_handle("h1").is_none());
        assert_eq!(storage.realm_for_handle("h2").as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_delete_realms_by_session() {
        let storage = RealmStorage::new();
        storage.add_realm(realm("r1", "C1", "S1", None));
        storage.add_realm(realm("r2", "C1", "S1", Some("sb")));
        storage.add_realm(realm("r3", "C2", "S2", None));

        let removed = storage.delete_realms(&RealmFilter {
            session_id: Some("S1".to_string()),
            ..Default::default()
        });
        assert_eq!(removed, 2);
        assert!(storage.find_realm_by_id("r3").is_some());
    }

    #[tokio::test]
    async fn test_find_by_execution_context() {
        let storage = RealmStorage::new();
        storage.add_realm(realm("r1", "C1", "S1", None));
        let found = storage.find_by_execution_context("S1", 1).unwrap();
        assert_eq!(found.realm_id(), "r1");
        assert!(storage.find_by_execution_context("S1", 2).is_none());
        assert!(storage.find_by_execution_context("S9", 1).is_none());
    }

    #[tokio::test]
    async fn test_add_realm_dedupes_by_execution_context() {
        let storage = RealmStorage::new();
        storage.add_realm(realm("r1", "C1", "S1", None));
        let stored = storage.add_realm(realm("r2", "C1", "S1", None));
        assert_eq!(stored.realm_id(), "r1");
        assert!(storage.find_realm_by_id("r2").is_none());
    }

    #[test]
    fn test_generated_realm_ids_are_unique() {
        let a = new_realm_id();
        let b = new_realm_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
