//! Event subscription manager
//!
//! Decides which registered events reach the client and on which channel.
//! A short list of lifecycle events is buffered per context before any
//! subscriber exists, so a late subscriber still sees the creation history
//! of live contexts.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::build_event;

/// Events buffered for contexts that nobody subscribed to yet
const BUFFERED_EVENTS: &[&str] = &[
    "browsingContext.contextCreated",
    "browsingContext.domContentLoaded",
    "browsingContext.load",
];

/// One subscription entry: an event name, an optional context restriction,
/// and the channel the subscribing command arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    event: String,
    context: Option<String>,
    channel: Option<String>,
}

struct BufferedEvent {
    seq: u64,
    event: String,
    context: String,
    params: Value,
}

/// A subscription entry matches an event either by exact name or, for a
/// dotless entry, as a whole-module subscription (`"browsingContext"`
/// covers every `browsingContext.*` event).
fn event_matches(subscribed: &str, event: &str) -> bool {
    if subscribed == event {
        return true;
    }
    !subscribed.contains('.') && event.split('.').next() == Some(subscribed)
}

#[derive(Default)]
struct State {
    subscriptions: Vec<Subscription>,
    buffers: HashMap<String, Vec<BufferedEvent>>,
    next_seq: u64,
}

/// Routes registered events to subscribers and buffers the rest
pub struct EventManager {
    out_tx: mpsc::UnboundedSender<String>,
    state: Mutex<State>,
}

impl EventManager {
    pub fn new(out_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            out_tx,
            state: Mutex::new(State::default()),
        }
    }

    /// Add subscription entries, then flush any buffered events the new
    /// entries match, oldest first.
    pub fn subscribe(&self, events: &[String], contexts: Option<&[String]>, channel: Option<&str>) {
        let mut state = self.state.lock().unwrap();

        let mut added = Vec::new();
        for event in events {
            let contexts: Vec<Option<String>> = match contexts {
                None => vec![None],
                Some(ids) => ids.iter().map(|id| Some(id.clone())).collect(),
            };
            for context in contexts {
                let entry = Subscription {
                    event: event.clone(),
                    context,
                    channel: channel.map(String::from),
                };
                if !state.subscriptions.contains(&entry) {
                    state.subscriptions.push(entry.clone());
                    added.push(entry);
                }
            }
        }

        // Flush matching buffered events in their original global order.
        let mut flushed = Vec::new();
        for buffer in state.buffers.values_mut() {
            buffer.retain(|buffered| {
                let matches = added.iter().any(|sub| {
                    event_matches(&sub.event, &buffered.event)
                        && (sub.context.is_none()
                            || sub.context.as_deref() == Some(&buffered.context))
                });
                if matches {
                    flushed.push((
                        buffered.seq,
                        buffered.event.clone(),
                        buffered.params.clone(),
                    ));
                }
                !matches
            });
        }
        flushed.sort_by_key(|(seq, _, _)| *seq);
        for (_, event, params) in flushed {
            let _ = self.out_tx.send(build_event(&event, &params, channel));
        }
    }

    /// Remove the matching subscription entries
    pub fn unsubscribe(
        &self,
        events: &[String],
        contexts: Option<&[String]>,
        channel: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        for event in events {
            let contexts: Vec<Option<String>> = match contexts {
                None => vec![None],
                Some(ids) => ids.iter().map(|id| Some(id.clone())).collect(),
            };
            for context in contexts {
                let entry = Subscription {
                    event: event.clone(),
                    context,
                    channel: channel.map(String::from),
                };
                state.subscriptions.retain(|s| s != &entry);
            }
        }
    }

    /// Route one occurrence of an event. Each channel with a matching
    /// subscription gets exactly one delivery; with no match, lifecycle
    /// events are buffered for their context.
    pub fn register_event(&self, event: &str, context: Option<&str>, params: Value) {
        let mut state = self.state.lock().unwrap();

        // Overlapping subscriptions on the same channel (say one global and
        // one context-scoped) must not duplicate the event there.
        let mut channels: Vec<Option<String>> = Vec::new();
        for sub in state.subscriptions.iter().filter(|sub| {
            event_matches(&sub.event, event)
                && (sub.context.is_none() || sub.context.as_deref() == context)
        }) {
            if !channels.contains(&sub.channel) {
                channels.push(sub.channel.clone());
            }
        }

        if channels.is_empty() {
            if let Some(context) = context {
                if BUFFERED_EVENTS.contains(&event) {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state
                        .buffers
                        .entry(context.to_string())
                        .or_default()
                        .push(BufferedEvent {
                            seq,
                            event: event.to_string(),
                            context: context.to_string(),
                            params,
                        });
                }
            }
            return;
        }

        for channel in channels {
            let _ = self
                .out_tx
                .send(build_event(event, &params, channel.as_deref()));
        }
    }

    /// Discard the buffer of a deleted context
    pub fn clear_context(&self, context: &str) {
        self.state.lock().unwrap().buffers.remove(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (EventManager, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventManager::new(tx), rx)
    }

    fn recv_event(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("expected event")).unwrap()
    }

    #[test]
    fn test_subscribed_event_is_delivered() {
        let (events, mut rx) = manager();
        events.subscribe(&["browsingContext.load".to_string()], None, None);
        events.register_event("browsingContext.load", Some("C1"), json!({"context": "C1"}));

        let event = recv_event(&mut rx);
        assert_eq!(event["method"], "browsingContext.load");
        assert_eq!(event["params"]["context"], "C1");
    }

    #[test]
    fn test_context_scoped_subscription_filters() {
        let (events, mut rx) = manager();
        events.subscribe(
            &["browsingContext.load".to_string()],
            Some(&["C1".to_string()]),
            None,
        );
        events.register_event("browsingContext.load", Some("C2"), json!({"context": "C2"}));
        assert!(rx.try_recv().is_err());

        events.register_event("browsingContext.load", Some("C1"), json!({"context": "C1"}));
        assert_eq!(recv_event(&mut rx)["params"]["context"], "C1");
    }

    #[test]
    fn test_channel_is_attached_per_subscription() {
        let (events, mut rx) = manager();
        events.subscribe(&["browsingContext.load".to_string()], None, Some("ch1"));
        events.subscribe(&["browsingContext.load".to_string()], None, Some("ch2"));
        events.register_event("browsingContext.load", Some("C1"), json!({}));

        let first = recv_event(&mut rx);
        let second = recv_event(&mut rx);
        let mut channels = vec![
            first["channel"].as_str().unwrap().to_string(),
            second["channel"].as_str().unwrap().to_string(),
        ];
        channels.sort();
        assert_eq!(channels, vec!["ch1", "ch2"]);
    }

    #[test]
    fn test_overlapping_subscriptions_share_channel_deliver_once() {
        let (events, mut rx) = manager();
        events.subscribe(
            &["browsingContext.load".to_string()],
            Some(&["C1".to_string()]),
            Some("ch"),
        );
        events.subscribe(&["browsingContext.load".to_string()], None, Some("ch"));
        events.register_event("browsingContext.load", Some("C1"), json!({}));

        assert_eq!(recv_event(&mut rx)["channel"], "ch");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_module_prefix_subscription_matches_module_events() {
        let (events, mut rx) = manager();
        events.subscribe(&["browsingContext".to_string()], None, None);

        events.register_event("browsingContext.load", Some("C1"), json!({"n": 1}));
        assert_eq!(recv_event(&mut rx)["method"], "browsingContext.load");

        events.register_event("log.entryAdded", Some("C1"), json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_module_prefix_subscription_flushes_buffer() {
        let (events, mut rx) = manager();
        events.register_event(
            "browsingContext.contextCreated",
            Some("C1"),
            json!({"context": "C1"}),
        );
        events.subscribe(&["browsingContext".to_string()], None, None);
        assert_eq!(
            recv_event(&mut rx)["method"],
            "browsingContext.contextCreated"
        );
    }

    #[test]
    fn test_unmatched_lifecycle_event_is_buffered_and_flushed() {
        let (events, mut rx) = manager();
        events.register_event(
            "browsingContext.contextCreated",
            Some("C1"),
            json!({"context": "C1"}),
        );
        assert!(rx.try_recv().is_err());

        events.subscribe(&["browsingContext.contextCreated".to_string()], None, None);
        let event = recv_event(&mut rx);
        assert_eq!(event["method"], "browsingContext.contextCreated");
    }

    #[test]
    fn test_buffer_flushes_once() {
        let (events, mut rx) = manager();
        events.register_event("browsingContext.load", Some("C1"), json!({"n": 1}));
        events.subscribe(&["browsingContext.load".to_string()], None, None);
        assert_eq!(recv_event(&mut rx)["params"]["n"], 1);

        // A second overlapping subscription must not replay it.
        events.subscribe(
            &["browsingContext.load".to_string()],
            Some(&["C1".to_string()]),
            None,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_buffered_events_flush_in_original_order() {
        let (events, mut rx) = manager();
        events.register_event("browsingContext.contextCreated", Some("C1"), json!({"n": 1}));
        events.register_event("browsingContext.contextCreated", Some("C2"), json!({"n": 2}));
        events.register_event("browsingContext.load", Some("C1"), json!({"n": 3}));

        events.subscribe(
            &[
                "browsingContext.contextCreated".to_string(),
                "browsingContext.load".to_string(),
            ],
            None,
            None,
        );
        assert_eq!(recv_event(&mut rx)["params"]["n"], 1);
        assert_eq!(recv_event(&mut rx)["params"]["n"], 2);
        assert_eq!(recv_event(&mut rx)["params"]["n"], 3);
    }

    #[test]
    fn test_non_lifecycle_event_is_not_buffered() {
        let (events, mut rx) = manager();
        events.register_event("log.entryAdded", Some("C1"), json!({}));
        events.subscribe(&["log.entryAdded".to_string()], None, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cleared_context_buffer_is_gone() {
        let (events, mut rx) = manager();
        events.register_event("browsingContext.contextCreated", Some("C1"), json!({}));
        events.clear_context("C1");
        events.subscribe(&["browsingContext.contextCreated".to_string()], None, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_unsubscribe_round_trip() {
        let (events, mut rx) = manager();
        events.subscribe(&["browsingContext.load".to_string()], None, None);
        events.unsubscribe(&["browsingContext.load".to_string()], None, None);
        events.register_event("browsingContext.load", Some("C1"), json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_subscription_delivers_once() {
        let (events, mut rx) = manager();
        events.subscribe(&["browsingContext.load".to_string()], None, None);
        events.subscribe(&["browsingContext.load".to_string()], None, None);
        events.register_event("browsingContext.load", Some("C1"), json!({}));
        recv_event(&mut rx);
        assert!(rx.try_recv().is_err());
    }
}
