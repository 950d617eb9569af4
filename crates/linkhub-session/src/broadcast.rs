//! Session-scoped event fan-out.
//!
//! Observers subscribe to one or more session scopes. Publishing an event for
//! a session delivers it to every observer in that scope and to nobody else.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use linkhub_core::{SessionEvent, SessionId};

/// Unique observer identifier.
pub type ObserverId = Uuid;

/// An event together with the session scope it was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    /// Session the event belongs to
    pub session_id: SessionId,
    /// The event itself
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Sending half of one observer's event queue.
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    id: ObserverId,
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl ObserverHandle {
    /// Observer identifier.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Deliver an event to this observer only. Returns false when the
    /// observer has gone away.
    pub fn send(&self, session_id: &SessionId, event: SessionEvent) -> bool {
        self.tx
            .send(OutboundEvent {
                session_id: session_id.clone(),
                event,
            })
            .is_ok()
    }

    /// Whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type Scopes = HashMap<SessionId, HashMap<ObserverId, ObserverHandle>>;

/// Fan-out hub keyed by session id. Clones share the same scopes.
#[derive(Debug, Clone, Default)]
pub struct EventBroadcaster {
    scopes: Arc<Mutex<Scopes>>,
}

impl EventBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new observer. It receives nothing until it subscribes.
    pub fn observer(&self) -> (ObserverHandle, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ObserverHandle {
            id: Uuid::new_v4(),
            tx,
        };
        (handle, rx)
    }

    /// Add `observer` to the scope of `session_id`.
    pub fn subscribe(&self, observer: &ObserverHandle, session_id: &SessionId) {
        self.scopes
            .lock()
            .entry(session_id.clone())
            .or_default()
            .insert(observer.id, observer.clone());
        trace!("Observer {} joined {}", observer.id, session_id);
    }

    /// Remove an observer from every scope.
    pub fn unsubscribe_all(&self, observer_id: ObserverId) {
        let mut scopes = self.scopes.lock();
        scopes.retain(|_, scope| {
            scope.remove(&observer_id);
            !scope.is_empty()
        });
    }

    /// Deliver `event` to every observer subscribed to `session_id`.
    ///
    /// Observers whose receiver was dropped are pruned. Returns the number of
    /// observers the event reached.
    pub fn publish(&self, session_id: &SessionId, event: SessionEvent) -> usize {
        let mut scopes = self.scopes.lock();
        let Some(scope) = scopes.get_mut(session_id) else {
            trace!("No observers for {} {}", session_id, event.name());
            return 0;
        };

        scope.retain(|_, observer| observer.send(session_id, event.clone()));
        let delivered = scope.len();
        if scope.is_empty() {
            scopes.remove(session_id);
        }

        trace!("Delivered {} for {} to {} observers", event.name(), session_id, delivered);
        delivered
    }

    /// Number of live observers in a scope.
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.scopes
            .lock()
            .get(session_id)
            .map(|scope| scope.values().filter(|o| !o.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkhub_core::SessionStatus;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn test_publish_is_scoped() {
        let hub = EventBroadcaster::new();
        let (a, mut rx_a) = hub.observer();
        let (b, mut rx_b) = hub.observer();
        hub.subscribe(&a, &id("s1"));
        hub.subscribe(&b, &id("s2"));

        let delivered = hub.publish(&id("s1"), SessionEvent::status(SessionStatus::Connected));
        assert_eq!(delivered, 1);

        let received = rx_a.try_recv().unwrap();
        assert_eq!(received.session_id, id("s1"));
        assert_eq!(received.event, SessionEvent::status(SessionStatus::Connected));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_observers() {
        let hub = EventBroadcaster::new();
        assert_eq!(hub.publish(&id("s1"), SessionEvent::error("x")), 0);
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let hub = EventBroadcaster::new();
        let (a, rx_a) = hub.observer();
        hub.subscribe(&a, &id("s1"));
        drop(rx_a);

        assert_eq!(hub.subscriber_count(&id("s1")), 0);
        assert_eq!(hub.publish(&id("s1"), SessionEvent::error("x")), 0);
    }

    #[test]
    fn test_unsubscribe_all() {
        let hub = EventBroadcaster::new();
        let (a, mut rx_a) = hub.observer();
        hub.subscribe(&a, &id("s1"));
        hub.subscribe(&a, &id("s2"));
        hub.unsubscribe_all(a.id());

        hub.publish(&id("s1"), SessionEvent::error("x"));
        hub.publish(&id("s2"), SessionEvent::error("x"));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_double_subscribe_delivers_once() {
        let hub = EventBroadcaster::new();
        let (a, mut rx_a) = hub.observer();
        hub.subscribe(&a, &id("s1"));
        hub.subscribe(&a, &id("s1"));

        hub.publish(&id("s1"), SessionEvent::error("x"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_outbound_event_json() {
        let event = OutboundEvent {
            session_id: id("s1"),
            event: SessionEvent::PairingCode {
                code: "ABCD-1234".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["event"], "session:pairing-code");
        assert_eq!(json["data"]["code"], "ABCD-1234");
    }
}
