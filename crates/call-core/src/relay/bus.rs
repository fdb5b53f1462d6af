//! Subscriber registry for inbound relay events
//!
//! Handlers run synchronously on the relay supervisor task, in subscription
//! order. They must not block; the state machine's handler only enqueues.

use super::{EventKind, RelayEvent};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Callback invoked for every event of the subscribed kind
pub type EventHandler = Arc<dyn Fn(&RelayEvent) + Send + Sync>;

/// Returned by [`EventBus::subscribe`]; pass to `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RelayEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` if the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if let Some(pos) = subscriptions.iter().position(|s| s.id == id) {
            subscriptions.remove(pos);
            true
        } else {
            false
        }
    }

    /// Deliver `event` to every matching handler; returns how many ran
    pub fn publish(&self, event: &RelayEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may (un)subscribe without deadlocking
        let matching: Vec<Subscription> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect();

        trace!("Publishing {:?} to {} handler(s)", kind, matching.len());
        for subscription in &matching {
            (subscription.handler)(event);
        }
        matching.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(EventKind::CallEnded, move |_| seen.lock().push(label));
        }
        let other = seen.clone();
        bus.subscribe(EventKind::CallOffer, move |_| other.lock().push("offer"));

        assert_eq!(bus.publish(&RelayEvent::CallEnded), 3);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = bus.subscribe(EventKind::CallEnded, move |_| *counter.lock() += 1);

        bus.publish(&RelayEvent::CallEnded);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&RelayEvent::CallEnded);

        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (bus_ref, slot_ref) = (bus.clone(), slot.clone());
        let id = bus.subscribe(EventKind::CallEnded, move |_| {
            if let Some(id) = slot_ref.lock().take() {
                bus_ref.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(bus.publish(&RelayEvent::CallEnded), 1);
        assert_eq!(bus.publish(&RelayEvent::CallEnded), 0);
    }
}
