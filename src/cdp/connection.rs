//! CDP connection and session clients
//!
//! Multiplexes every CDP session over one duplex string channel: correlates
//! request id to response, and fans events out to listeners registered per
//! `(session, method)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::transport::{build_command, parse_message, CdpMessage};
use crate::error::{Error, Result};

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;

/// Key into the listener table. `method: None` subscribes to every event on
/// the session; `session: None` addresses the browser-level session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListenerKey {
    session: Option<String>,
    method: Option<String>,
}

/// A CDP event delivered to a listener channel
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

struct Inner {
    /// Outbound wire strings toward the browser
    tx: mpsc::UnboundedSender<String>,
    /// Next message ID
    next_id: AtomicU64,
    /// Pending requests waiting for responses
    pending: Mutex<HashMap<u64, PendingRequest>>,
    /// Event listeners keyed by (session, method)
    listeners: Mutex<HashMap<ListenerKey, Vec<mpsc::UnboundedSender<CdpEvent>>>>,
    /// Set once the inbound side of the transport closes
    closed: AtomicBool,
}

/// A CDP connection over one duplex transport
pub struct CdpConnection {
    inner: Arc<Inner>,
}

impl CdpConnection {
    /// Create a connection over the given channel pair. Spawns the reader
    /// task that drains `rx` until the transport closes.
    pub fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Arc<Self> {
        let inner = Arc::new(Inner {
            tx,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::reader_loop(reader_inner, rx).await;
        });

        Arc::new(Self { inner })
    }

    async fn reader_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = rx.recv().await {
            let Some(msg) = parse_message(&text) else {
                continue;
            };
            match msg {
                CdpMessage::Response { id, result } => {
                    let sender = inner.pending.lock().unwrap().remove(&id);
                    if let Some(sender) = sender {
                        let _ = sender.send(result);
                    } else {
                        tracing::trace!("Response for unknown id: {}", id);
                    }
                }
                CdpMessage::Event {
                    method,
                    params,
                    session_id,
                } => {
                    Self::dispatch_event(&inner, method, params, session_id);
                }
            }
        }

        // Transport closed: every pending sink rejects exactly once.
        inner.closed.store(true, Ordering::SeqCst);
        let pending: Vec<PendingRequest> = {
            let mut guard = inner.pending.lock().unwrap();
            guard.drain().map(|(_, tx)| tx).collect()
        };
        for sender in pending {
            let _ = sender.send(Err(Error::Disconnected));
        }
        tracing::debug!("CDP reader loop ended");
    }

    fn dispatch_event(inner: &Inner, method: String, params: Value, session_id: Option<String>) {
        let event = CdpEvent {
            method: method.clone(),
            params,
            session_id: session_id.clone(),
        };
        let keys = [
            ListenerKey {
                session: session_id.clone(),
                method: Some(method),
            },
            ListenerKey {
                session: session_id,
                method: None,
            },
        ];
        let mut listeners = inner.listeners.lock().unwrap();
        for key in keys {
            if let Some(sinks) = listeners.get_mut(&key) {
                sinks.retain(|sink| sink.send(event.clone()).is_ok());
            }
        }
    }

    /// The browser-level client (commands without a `sessionId`)
    pub fn browser_client(self: &Arc<Self>) -> CdpClient {
        CdpClient {
            connection: Arc::clone(self),
            session_id: None,
        }
    }

    /// A client bound to one attached session
    pub fn session_client(self: &Arc<Self>, session_id: impl Into<String>) -> CdpClient {
        CdpClient {
            connection: Arc::clone(self),
            session_id: Some(session_id.into()),
        }
    }

    /// Register an event listener. `method: None` receives every event on
    /// the session. The receiver keeps browser emission order.
    pub fn add_listener(
        &self,
        session_id: Option<&str>,
        method: Option<&str>,
    ) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = ListenerKey {
            session: session_id.map(String::from),
            method: method.map(String::from),
        };
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(tx);
        rx
    }

    /// Drop every listener registered for a session
    pub fn remove_session_listeners(&self, session_id: &str) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|key, _| key.session.as_deref() != Some(session_id));
    }

    /// Send a raw CDP command and wait for the correlated response
    pub async fn send_command_raw(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Disconnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let wire = build_command(id, method, &params, session_id);
        tracing::trace!(
            "Sent CDP command: {} (id={}, session={:?})",
            method,
            id,
            session_id
        );
        if self.inner.tx.send(wire).is_err() {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(Error::Disconnected);
        }

        rx.await.map_err(|_| Error::Disconnected)?
    }
}

/// A lightweight handle for issuing commands on one CDP session (or on the
/// browser session when `session_id` is `None`).
#[derive(Clone)]
pub struct CdpClient {
    connection: Arc<CdpConnection>,
    session_id: Option<String>,
}

impl CdpClient {
    /// The session ID, if this client is bound to one
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<CdpConnection> {
        &self.connection
    }

    /// Send a typed CDP command on this session
    pub async fn send_command<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self
            .connection
            .send_command_raw(self.session_id.as_deref(), method, params)
            .await?;
        let response: R = serde_json::from_value(result)?;
        Ok(response)
    }

    /// Send a raw CDP command on this session
    pub async fn send_command_raw(&self, method: &str, params: Value) -> Result<Value> {
        self.connection
            .send_command_raw(self.session_id.as_deref(), method, params)
            .await
    }

    /// Register an event listener on this session
    pub fn subscribe(&self, method: Option<&str>) -> mpsc::UnboundedReceiver<CdpEvent> {
        self.connection
            .add_listener(self.session_id.as_deref(), method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_correlates_response_by_id() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);

        let client = connection.browser_client();
        let call = tokio::spawn(async move {
            client
                .send_command_raw("Browser.getVersion", json!({}))
                .await
        });

        let wire = out_rx.recv().await.unwrap();
        let sent: Value = serde_json::from_str(&wire).unwrap();
        let id = sent["id"].as_u64().unwrap();
        in_tx
            .send(format!(r#"{{"id":{},"result":{{"product":"c"}}}}"#, id))
            .unwrap();

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["product"], "c");
    }

    #[tokio::test]
    async fn test_out_of_order_replies_matched_by_id() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);

        let a = connection.session_client("S1");
        let b = connection.session_client("S1");
        let first = tokio::spawn(async move { a.send_command_raw("A.a", json!({})).await });
        let wire_a: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        let second = tokio::spawn(async move { b.send_command_raw("B.b", json!({})).await });
        let wire_b: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();

        // Reply to the second command before the first.
        in_tx
            .send(format!(r#"{{"id":{},"result":{{"which":"b"}}}}"#, wire_b["id"]))
            .unwrap();
        in_tx
            .send(format!(r#"{{"id":{},"result":{{"which":"a"}}}}"#, wire_a["id"]))
            .unwrap();

        assert_eq!(second.await.unwrap().unwrap()["which"], "b");
        assert_eq!(first.await.unwrap().unwrap()["which"], "a");
    }

    #[tokio::test]
    async fn test_pending_rejects_on_transport_close() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);

        let client = connection.browser_client();
        let call =
            tokio::spawn(async move { client.send_command_raw("Page.enable", json!({})).await });
        tokio::task::yield_now().await;
        drop(in_tx);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[tokio::test]
    async fn test_events_fan_out_by_session() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);

        let mut s1 = connection.add_listener(Some("S1"), Some("Page.lifecycleEvent"));
        let mut s1_all = connection.add_listener(Some("S1"), None);
        let mut s2 = connection.add_listener(Some("S2"), Some("Page.lifecycleEvent"));

        in_tx
            .send(
                r#"{"method":"Page.lifecycleEvent","params":{"name":"load"},"sessionId":"S1"}"#
                    .to_string(),
            )
            .unwrap();

        let event = s1.recv().await.unwrap();
        assert_eq!(event.method, "Page.lifecycleEvent");
        let event = s1_all.recv().await.unwrap();
        assert_eq!(event.params["name"], "load");
        assert!(s2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_browser_events_go_to_null_session() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connection = CdpConnection::new(out_tx, in_rx);

        let mut browser = connection.add_listener(None, Some("Target.attachedToTarget"));
        in_tx
            .send(r#"{"method":"Target.attachedToTarget","params":{}}"#.to_string())
            .unwrap();
        let event = browser.recv().await.unwrap();
        assert_eq!(event.method, "Target.attachedToTarget");
        assert!(event.session_id.is_none());
    }
}
