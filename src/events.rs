//! Out-of-band event delivery.
//!
//! Events are fire-and-forget: each one is delivered, in arrival order, to
//! the subscriptions alive at that moment. Nothing is queued for
//! subscribers that appear later, and an event nobody listens to is
//! dropped.
//!
//! The gateway's `connect.challenge` notification is informational and is
//! never delivered.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::EventFrame;

// ============================================================================
// Constants
// ============================================================================

/// Connection-identity challenge; needs no reply and is never delivered.
pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";

// ============================================================================
// Event
// ============================================================================

/// An event received from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name.
    pub name: String,
    /// Event data (`Value::Null` if absent).
    pub payload: Value,
}

impl From<EventFrame> for Event {
    fn from(frame: EventFrame) -> Self {
        Self {
            name: frame.event,
            payload: frame.payload.unwrap_or(Value::Null),
        }
    }
}

// ============================================================================
// EventSubscription
// ============================================================================

/// Receiving end of an event subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventSubscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the owning client is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

// ============================================================================
// EventSink
// ============================================================================

/// Registered observer.
struct Observer {
    /// Event name to match, or `None` for every event.
    filter: Option<String>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Observer {
    fn wants(&self, name: &str) -> bool {
        self.filter.as_deref().is_none_or(|filter| filter == name)
    }
}

/// Fan-out of inbound events to subscribers.
#[derive(Default)]
pub struct EventSink {
    observers: Mutex<Vec<Observer>>,
}

impl EventSink {
    /// Creates a sink with no observers.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to events named `name`.
    #[must_use]
    pub fn subscribe(&self, name: impl Into<String>) -> EventSubscription {
        self.add_observer(Some(name.into()))
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn subscribe_all(&self) -> EventSubscription {
        self.add_observer(None)
    }

    fn add_observer(&self, filter: Option<String>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(Observer { filter, tx });
        EventSubscription { rx }
    }

    /// Delivers an event to matching observers.
    ///
    /// Returns the number of observers that received it.
    pub fn publish(&self, frame: EventFrame) -> usize {
        if frame.event == EVENT_CONNECT_CHALLENGE {
            trace!("Ignoring connect challenge");
            return 0;
        }

        let event = Event::from(frame);
        let mut observers = self.observers.lock();
        observers.retain(|observer| !observer.tx.is_closed());

        let mut delivered = 0;
        for observer in observers.iter().filter(|o| o.wants(&event.name)) {
            if observer.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!(event = %event.name, "Event has no observers");
        }

        delivered
    }

    /// Returns the number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        let mut observers = self.observers.lock();
        observers.retain(|observer| !observer.tx.is_closed());
        observers.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
