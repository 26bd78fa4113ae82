//! Browsing context state
//!
//! One [`BrowsingContext`] per browser frame. Holds the navigation state
//! machine driven by CDP lifecycle events, and the signals commands await
//! before touching a context.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::cdp::types::{PageNavigate, PageNavigateResult, PageReload};
use crate::error::{Error, Result};
use crate::protocol::commands::ReadinessState;
use crate::target::CdpTarget;

/// Navigation lifecycle of a context, driven by CDP `Page` events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Initial,
    Navigating,
    Loading,
    Interactive,
    Complete,
    Deleted,
}

/// A single browser frame (top-level tab/window or nested iframe)
pub struct BrowsingContext {
    id: String,
    parent_id: Option<String>,
    url: Mutex<String>,
    /// Loader id of the current document; scopes `sharedId` values
    navigable_id: Mutex<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
    /// Swapped out when the frame migrates to a new target (OOPIF)
    target: Mutex<Arc<CdpTarget>>,
    /// Loader id observed at DOMContentLoaded; reset on each navigation
    dcl_tx: watch::Sender<Option<String>>,
    /// Loader id observed at load; reset on each navigation
    load_tx: watch::Sender<Option<String>>,
    deleted_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .finish()
    }
}

impl BrowsingContext {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        url: impl Into<String>,
        target: Arc<CdpTarget>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent_id,
            url: Mutex::new(url.into()),
            navigable_id: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Initial),
            target: Mutex::new(target),
            dcl_tx: watch::channel(None).0,
            load_tx: watch::channel(None).0,
            deleted_tx: watch::channel(false).0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    pub fn navigable_id(&self) -> Option<String> {
        self.navigable_id.lock().unwrap().clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    pub fn target(&self) -> Arc<CdpTarget> {
        Arc::clone(&self.target.lock().unwrap())
    }

    /// Swap the owning target in place. Used when a frame migrates to a new
    /// process: the context survives, the session does not.
    pub fn set_target(&self, target: Arc<CdpTarget>) {
        *self.target.lock().unwrap() = target;
    }

    /// A navigation was requested for this context
    pub fn set_navigating(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Navigating;
    }

    /// `Page.frameNavigated`: a new document committed
    pub fn on_frame_navigated(&self, url: &str, loader_id: &str) {
        *self.url.lock().unwrap() = url.to_string();
        *self.navigable_id.lock().unwrap() = Some(loader_id.to_string());
        *self.lifecycle.lock().unwrap() = Lifecycle::Loading;
        // Edge-triggered: the old document's signals do not satisfy waiters
        // of the new one.
        let _ = self.dcl_tx.send(None);
        let _ = self.load_tx.send(None);
    }

    /// `Page.lifecycleEvent` for this frame
    pub fn on_lifecycle_event(&self, name: &str, loader_id: &str) {
        match name {
            "DOMContentLoaded" => {
                *self.lifecycle.lock().unwrap() = Lifecycle::Interactive;
                let _ = self.dcl_tx.send(Some(loader_id.to_string()));
            }
            "load" => {
                *self.lifecycle.lock().unwrap() = Lifecycle::Complete;
                let _ = self.load_tx.send(Some(loader_id.to_string()));
            }
            _ => {}
        }
    }

    /// The context (or its target) went away
    pub fn mark_deleted(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Deleted;
        let _ = self.deleted_tx.send(true);
    }

    /// Wait until the target behind this context finished its enable
    /// sequence. Fails if the context is deleted or the target broke during
    /// setup.
    pub async fn await_unblocked(&self) -> Result<()> {
        let mut deleted_rx = self.deleted_tx.subscribe();
        loop {
            if *deleted_rx.borrow() {
                return Err(Error::NoSuchFrame(self.id.clone()));
            }
            let target = self.target();
            tokio::select! {
                unblocked = target.await_unblocked() => return unblocked,
                changed = deleted_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::NoSuchFrame(self.id.clone()));
                    }
                }
            }
        }
    }

    async fn await_signal(
        &self,
        signal: &watch::Sender<Option<String>>,
        loader_id: &str,
    ) -> Result<()> {
        let mut rx = signal.subscribe();
        let mut deleted_rx = self.deleted_tx.subscribe();
        loop {
            if *deleted_rx.borrow() {
                return Err(Error::unknown("navigation aborted"));
            }
            if rx.borrow().as_deref() == Some(loader_id) {
                return Ok(());
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::unknown("navigation aborted"));
                    }
                }
                _ = deleted_rx.changed() => {}
            }
        }
    }

    /// Wait for `DOMContentLoaded` of the given navigation
    pub async fn await_dom_content_loaded(&self, loader_id: &str) -> Result<()> {
        self.await_signal(&self.dcl_tx, loader_id).await
    }

    /// Wait for `load` of the given navigation
    pub async fn await_load(&self, loader_id: &str) -> Result<()> {
        self.await_signal(&self.load_tx, loader_id).await
    }

    /// Map CDP failures caused by this context's target dying onto the
    /// error the client can act on.
    pub fn clarify_gone(&self, e: Error) -> Error {
        if e.is_target_gone() {
            Error::NoSuchFrame(self.id.clone())
        } else {
            e
        }
    }

    /// Navigate this context and resolve according to the wait condition
    pub async fn navigate(&self, url: &str, wait: ReadinessState) -> Result<Value> {
        self.await_unblocked().await?;
        self.set_navigating();

        let client = self.target().client().clone();
        let result: PageNavigateResult = client
            .send_command(
                "Page.navigate",
                &PageNavigate {
                    url: url.to_string(),
                    frame_id: Some(self.id.clone()),
                },
            )
            .await
            .map_err(|e| self.clarify_gone(e))?;

        if let Some(error_text) = result.error_text {
            return Err(Error::unknown(error_text));
        }

        // No loader id means a same-document navigation; there are no
        // lifecycle events to wait for.
        let Some(loader_id) = result.loader_id else {
            return Ok(json!({ "navigation": Value::Null, "url": url }));
        };

        match wait {
            ReadinessState::None => {}
            ReadinessState::Interactive => self.await_dom_content_loaded(&loader_id).await?,
            ReadinessState::Complete => self.await_load(&loader_id).await?,
        }

        Ok(json!({ "navigation": loader_id, "url": url }))
    }

    /// Reload this context and resolve against the next lifecycle pair
    pub async fn reload(&self, ignore_cache: Option<bool>, wait: ReadinessState) -> Result<Value> {
        self.await_unblocked().await?;

        // Subscribe before issuing the reload so the next signal cannot be
        // missed; anything already observed does not count.
        let signal = match wait {
            ReadinessState::None => None,
            ReadinessState::Interactive => Some(&self.dcl_tx),
            ReadinessState::Complete => Some(&self.load_tx),
        };
        let mut rx = signal.map(|signal| {
            let mut rx = signal.subscribe();
            rx.borrow_and_update();
            rx
        });

        self.set_navigating();
        let client = self.target().client().clone();
        client
            .send_command::<_, Value>("Page.reload", &PageReload { ignore_cache })
            .await
            .map_err(|e| self.clarify_gone(e))?;

        if let Some(rx) = rx.as_mut() {
            let mut deleted_rx = self.deleted_tx.subscribe();
            loop {
                if *deleted_rx.borrow() {
                    return Err(Error::unknown("navigation aborted"));
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Err(Error::unknown("navigation aborted"));
                        }
                        if rx.borrow().is_some() {
                            break;
                        }
                    }
                    _ = deleted_rx.changed() => {}
                }
            }
        }

        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CdpConnection;
    use tokio::sync::mpsc;

    fn test_target() -> Arc<CdpTarget> {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);
        CdpTarget::new("T1", "S1", connection.session_client("S1"))
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let context = BrowsingContext::new("C1", None, "about:blank", test_target());
        assert_eq!(context.lifecycle(), Lifecycle::Initial);

        context.set_navigating();
        assert_eq!(context.lifecycle(), Lifecycle::Navigating);

        context.on_frame_navigated("http://x/", "L1");
        assert_eq!(context.lifecycle(), Lifecycle::Loading);
        assert_eq!(context.url(), "http://x/");
        assert_eq!(context.navigable_id().as_deref(), Some("L1"));

        context.on_lifecycle_event("DOMContentLoaded", "L1");
        assert_eq!(context.lifecycle(), Lifecycle::Interactive);

        context.on_lifecycle_event("load", "L1");
        assert_eq!(context.lifecycle(), Lifecycle::Complete);
    }

    #[tokio::test]
    async fn test_await_load_resolves_on_matching_loader() {
        let context = BrowsingContext::new("C1", None, "about:blank", test_target());
        context.on_frame_navigated("http://x/", "L1");

        let waiter = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { context.await_load("L1").await })
        };
        // A stale loader id does not satisfy the wait.
        context.on_lifecycle_event("load", "L0");
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        context.on_lifecycle_event("load", "L1");
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_await_load_aborts_on_delete() {
        let context = BrowsingContext::new("C1", None, "about:blank", test_target());
        let waiter = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { context.await_load("L1").await })
        };
        tokio::task::yield_now().await;
        context.mark_deleted();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("navigation aborted"));
    }

    #[tokio::test]
    async fn test_signals_reset_on_new_navigation() {
        let context = BrowsingContext::new("C1", None, "about:blank", test_target());
        context.on_frame_navigated("http://x/", "L1");
        context.on_lifecycle_event("load", "L1");

        // A second navigation resets the signal; waiting on its loader only
        // completes once its own load fires.
        context.on_frame_navigated("http://y/", "L2");
        let waiter = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { context.await_load("L2").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        context.on_lifecycle_event("load", "L2");
        waiter.await.unwrap().unwrap();
    }
}
