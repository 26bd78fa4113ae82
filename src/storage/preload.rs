//! Preload script records
//!
//! A BiDi preload script is one record fanned out to a CDP
//! `Page.addScriptToEvaluateOnNewDocument` installation per matching
//! target. The record outlives individual targets; a target teardown only
//! drops its own installations.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::cdp::types::{
    PageAddScriptToEvaluateOnNewDocument, PageAddScriptToEvaluateOnNewDocumentResult,
    PageRemoveScriptToEvaluateOnNewDocument,
};
use crate::cdp::CdpClient;
use crate::error::{Error, Result};
use crate::realm::new_realm_id;
use crate::target::CdpTarget;

/// One CDP-side installation of a BiDi preload script
#[derive(Clone)]
pub struct CdpPreloadScript {
    pub target_id: String,
    pub client: CdpClient,
    pub cdp_id: String,
}

/// A client-installed preload script and its per-target materializations
pub struct BidiPreloadScript {
    id: String,
    /// Restricts installation to one top-level context when set
    context_id: Option<String>,
    function_declaration: String,
    sandbox: Option<String>,
    cdp_scripts: Mutex<Vec<CdpPreloadScript>>,
}

impl BidiPreloadScript {
    pub fn new(
        context_id: Option<String>,
        function_declaration: String,
        sandbox: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: new_realm_id(),
            context_id,
            function_declaration,
            sandbox,
            cdp_scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// The source actually shipped to the browser: the function invoked
    pub fn source(&self) -> String {
        format!("({})()", self.function_declaration)
    }

    pub fn applies_to(&self, top_level_context: &str) -> bool {
        match &self.context_id {
            None => true,
            Some(context) => context == top_level_context,
        }
    }

    pub fn cdp_scripts(&self) -> Vec<CdpPreloadScript> {
        self.cdp_scripts.lock().unwrap().clone()
    }

    fn record_installation(&self, installation: CdpPreloadScript) {
        self.cdp_scripts.lock().unwrap().push(installation);
    }

    fn drop_target(&self, target_id: &str) {
        self.cdp_scripts
            .lock()
            .unwrap()
            .retain(|s| s.target_id != target_id);
    }

    /// Install this script on one target and record the CDP id
    pub async fn install_on(&self, target: &CdpTarget) -> Result<()> {
        let result: PageAddScriptToEvaluateOnNewDocumentResult = target
            .client()
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                &PageAddScriptToEvaluateOnNewDocument {
                    source: self.source(),
                    world_name: self.sandbox.clone(),
                },
            )
            .await?;
        self.record_installation(CdpPreloadScript {
            target_id: target.target_id().to_string(),
            client: target.client().clone(),
            cdp_id: result.identifier,
        });
        Ok(())
    }
}

/// All BiDi preload script records
#[derive(Default)]
pub struct PreloadScriptStorage {
    scripts: Mutex<Vec<Arc<BidiPreloadScript>>>,
}

impl PreloadScriptStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_script(&self, script: Arc<BidiPreloadScript>) {
        self.scripts.lock().unwrap().push(script);
    }

    pub fn find_script(&self, id: &str) -> Option<Arc<BidiPreloadScript>> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// Remove a BiDi record entirely, uninstalling it from every target it
    /// was materialized on. Targets that already died are skipped.
    pub async fn remove_script(&self, id: &str) -> Result<()> {
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            let index = scripts
                .iter()
                .position(|s| s.id() == id)
                .ok_or_else(|| Error::NoSuchScript(id.to_string()))?;
            scripts.remove(index)
        };

        for installation in script.cdp_scripts() {
            let removed = installation
                .client
                .send_command::<_, Value>(
                    "Page.removeScriptToEvaluateOnNewDocument",
                    &PageRemoveScriptToEvaluateOnNewDocument {
                        identifier: installation.cdp_id.clone(),
                    },
                )
                .await;
            if let Err(e) = removed {
                if e.is_target_gone() {
                    continue;
                }
                tracing::warn!(
                    "Failed to remove preload script from {}: {}",
                    installation.target_id,
                    e
                );
            }
        }
        Ok(())
    }

    /// Drop the installations a dead target carried. BiDi records survive
    /// for the targets that still carry them.
    pub fn remove_target(&self, target_id: &str) {
        for script in self.scripts.lock().unwrap().iter() {
            script.drop_target(target_id);
        }
    }

    /// Install every applicable record on a freshly attached target
    pub async fn install_on_target(
        &self,
        target: &CdpTarget,
        top_level_context: &str,
    ) -> Result<()> {
        let applicable: Vec<Arc<BidiPreloadScript>> = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.applies_to(top_level_context))
            .cloned()
            .collect();
        for script in applicable {
            script.install_on(target).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_script_applies_everywhere() {
        let script = BidiPreloadScript::new(None, "() => {}".to_string(), None);
        assert!(script.applies_to("C1"));
        assert!(script.applies_to("C2"));
    }

    #[test]
    fn test_scoped_script_applies_to_one_context() {
        let script = BidiPreloadScript::new(Some("C1".to_string()), "() => {}".to_string(), None);
        assert!(script.applies_to("C1"));
        assert!(!script.applies_to("C2"));
    }

    #[test]
    fn test_source_wraps_function_in_invocation() {
        let script = BidiPreloadScript::new(None, "() => { window.x = 1; }".to_string(), None);
        assert_eq!(script.source(), "(() => { window.x = 1; })()");
    }

    #[tokio::test]
    async fn test_remove_unknown_script_is_no_such_script() {
        let storage = PreloadScriptStorage::new();
        let err = storage.remove_script("nope").await.unwrap_err();
        assert_eq!(err.code(), "no such script");
    }

    #[test]
    fn test_remove_target_keeps_record() {
        let storage = PreloadScriptStorage::new();
        let script = BidiPreloadScript::new(None, "() => {}".to_string(), None);
        storage.add_script(Arc::clone(&script));
        storage.remove_target("T1");
        assert!(storage.find_script(script.id()).is_some());
    }
}
