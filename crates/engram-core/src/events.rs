//! Engine Event Stream
//!
//! In-process notification bus. Writers emit a typed event after each
//! externally visible mutation; subscribers run synchronously on the writer's
//! thread and a panicking subscriber is isolated so it cannot poison a write.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Kind of engine mutation being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineEventType {
    Record,
    Supersede,
    Accept,
    Delete,
    Decay,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEventType::Record => "record",
            EngineEventType::Supersede => "supersede",
            EngineEventType::Accept => "accept",
            EngineEventType::Delete => "delete",
            EngineEventType::Decay => "decay",
        }
    }
}

/// A notification emitted to in-process subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub event_type: EngineEventType,
    pub data: serde_json::Value,
}

type Subscriber = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Event bus for engine notifications
#[derive(Default)]
pub struct EventEmitter {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for all engine events.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Box::new(callback));
        }
    }

    /// Dispatch an event to every subscriber.
    pub fn emit(&self, event_type: EngineEventType, data: serde_json::Value) {
        let event = EngineEvent { event_type, data };
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("Event subscriber list poisoned, dropping {:?}", event_type);
                return;
            }
        };
        for subscriber in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                tracing::error!("Event subscriber panicked on {:?}", event_type);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            emitter.subscribe(move |event| {
                assert_eq!(event.event_type, EngineEventType::Record);
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        emitter.emit(EngineEventType::Record, serde_json::json!({"fid": "d-1"}));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));

        emitter.subscribe(|_| panic!("bad subscriber"));
        let seen_clone = Arc::clone(&seen);
        emitter.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(EngineEventType::Decay, serde_json::json!({}));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
