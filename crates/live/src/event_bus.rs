//! In-process publish/subscribe for connection lifecycle events.
//!
//! One bus is created per process and shared by `Arc` with every component
//! that emits or listens. Listeners run synchronously on the emitting task
//! and must not block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Topic that receives every event.
pub const WILDCARD: &str = "*";

/// An emitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub data: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Topic → listener registry.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("topics", &listeners.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `topic`, or for every topic with [`WILDCARD`].
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Deliver an event to the topic's listeners, then to wildcard listeners.
    pub fn emit(&self, topic: &str, data: Value) {
        let event = BusEvent {
            topic: topic.to_string(),
            data,
            emitted_at: Utc::now(),
        };

        // Listeners are called without the lock so they may (un)subscribe.
        let targets: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners
                .get(topic)
                .into_iter()
                .chain(listeners.get(WILDCARD).filter(|_| topic != WILDCARD))
                .flatten()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        tracing::trace!(topic, listeners = targets.len(), "emitting bus event");
        for listener in targets {
            listener(&event);
        }
    }

    /// Number of listeners registered for `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(bus: &EventBus, topic: &str) -> (ListenerId, Arc<Mutex<Vec<BusEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(topic, move |event| sink.lock().unwrap().push(event.clone()));
        (id, seen)
    }

    #[test]
    fn test_topic_delivery() {
        let bus = EventBus::new();
        let (_, connected) = recorder(&bus, "live.connected");
        let (_, errors) = recorder(&bus, "live.error");

        bus.emit("live.connected", json!({"user_id": 1}));

        let connected = connected.lock().unwrap();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].data["user_id"], 1);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wildcard_sees_everything() {
        let bus = EventBus::new();
        let (_, all) = recorder(&bus, WILDCARD);

        bus.emit("a", Value::Null);
        bus.emit("b", Value::Null);

        let topics: Vec<String> = all.lock().unwrap().iter().map(|e| e.topic.clone()).collect();
        assert_eq!(topics, vec!["a", "b"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let (id, seen) = recorder(&bus, "x");
        assert_eq!(bus.listener_count("x"), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.listener_count("x"), 0);

        bus.emit("x", Value::Null);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        bus.subscribe("x", move |_| {
            inner_bus.subscribe("y", |_| {});
        });

        bus.emit("x", Value::Null);
        assert_eq!(bus.listener_count("y"), 1);
    }
}
