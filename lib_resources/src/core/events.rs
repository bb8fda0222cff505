//! # Lifecycle Event Dispatcher
//!
//! Resource records announce their lifecycle (`create`, `ready`, `error`,
//! `delete`) to any number of observers, typically a store-binding layer that
//! mirrors resource state into application state.
//!
//! ## Design
//!
//! - **Per-kind subscriptions**: each subscriber names the [`EventKind`]s it
//!   wants. A subscriber for several kinds receives them on one channel, in
//!   emission order.
//! - **Non-blocking fan-out**: every subscriber owns an unbounded MPSC channel.
//!   Emitting never waits and never runs observer code, so it is safe to emit
//!   while record or manager locks are held. This is what keeps per-id event
//!   order intact (`create` first, `delete` last).
//! - **Self-cleaning**: subscribers whose receiver was dropped are removed on
//!   the next emit.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::value::Value;
use crate::error::CreationError;
use crate::utils::ids::ResourceId;

/// The name of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A record was created for a new request.
    Create,
    /// A creation attempt produced a value.
    Ready,
    /// A creation attempt failed.
    Error,
    /// A record was destroyed and removed from the cache.
    Delete,
}

impl EventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Create,
        EventKind::Ready,
        EventKind::Error,
        EventKind::Delete,
    ];
}

/// A lifecycle event, tagged with the id of the record it concerns.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Emitted once, when the record is inserted into the cache.
    Create {
        /// Record id.
        id: ResourceId,
        /// The request the record serves.
        request: Arc<Value>,
    },
    /// Emitted when a creation attempt succeeds.
    Ready {
        /// Record id.
        id: ResourceId,
        /// The resolved value.
        value: Arc<Value>,
    },
    /// Emitted when a creation attempt fails.
    Error {
        /// Record id.
        id: ResourceId,
        /// The reported failure.
        error: CreationError,
    },
    /// Terminal event for the id.
    Delete {
        /// Record id.
        id: ResourceId,
        /// The request the record served.
        request: Arc<Value>,
    },
}

impl LifecycleEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Create { .. } => EventKind::Create,
            LifecycleEvent::Ready { .. } => EventKind::Ready,
            LifecycleEvent::Error { .. } => EventKind::Error,
            LifecycleEvent::Delete { .. } => EventKind::Delete,
        }
    }

    /// The record this event concerns.
    pub fn id(&self) -> ResourceId {
        match self {
            LifecycleEvent::Create { id, .. }
            | LifecycleEvent::Ready { id, .. }
            | LifecycleEvent::Error { id, .. }
            | LifecycleEvent::Delete { id, .. } => *id,
        }
    }
}

struct Subscriber {
    kinds: Vec<EventKind>,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

/// Fans lifecycle events out to subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for the given kinds and returns its receiving end.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.push(Subscriber {
            kinds: kinds.to_vec(),
            sender: tx,
        });
        log::debug!("Lifecycle subscriber registered for {:?}", kinds);
        rx
    }

    /// Registers a subscriber for every kind.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.subscribe(&EventKind::ALL)
    }

    /// Delivers `event` to every interested subscriber, dropping the ones that
    /// went away.
    pub fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.retain(|subscriber| {
            if !subscriber.kinds.contains(&kind) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    log::debug!("Lifecycle subscriber disconnected. Removing from dispatcher.");
                    false
                }
            }
        });
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.iter().filter(|s| !s.sender.is_closed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: u64) -> LifecycleEvent {
        LifecycleEvent::Create {
            id: ResourceId(id),
            request: Arc::new(Value::from("r")),
        }
    }

    #[test]
    fn fans_out_to_every_matching_subscriber() {
        let dispatcher = EventDispatcher::new();
        let mut all = dispatcher.subscribe_all();
        let mut creates = dispatcher.subscribe(&[EventKind::Create]);
        let mut errors = dispatcher.subscribe(&[EventKind::Error]);

        dispatcher.emit(created(1));

        assert_eq!(all.try_recv().unwrap(), created(1));
        assert_eq!(creates.try_recv().unwrap(), created(1));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn drops_disconnected_subscribers() {
        let dispatcher = EventDispatcher::new();
        let rx = dispatcher.subscribe_all();
        let _keep = dispatcher.subscribe(&[EventKind::Delete]);
        assert_eq!(dispatcher.subscriber_count(), 2);

        drop(rx);
        dispatcher.emit(created(1));
        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[test]
    fn preserves_emission_order() {
        let dispatcher = EventDispatcher::new();
        let mut rx = dispatcher.subscribe_all();
        dispatcher.emit(created(1));
        dispatcher.emit(LifecycleEvent::Ready {
            id: ResourceId(1),
            value: Arc::new(Value::from(7)),
        });
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::Create);
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::Ready);
    }
}
