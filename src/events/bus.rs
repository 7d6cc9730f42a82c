//! Event Bus - central pub/sub system for UEP lifecycle events
//!
//! Delivery is synchronous within the publishing call, in subscription order.
//! A panic in one handler is caught and logged; later handlers still receive
//! the event. Handlers are named so that re-subscribing the same name for the
//! same event is a no-op.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use super::types::{Event, SystemEvent};

/// Boxed subscriber callback
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct NamedHandler {
    name: String,
    func: Handler,
}

/// Central event bus for UEP lifecycle events
///
/// Components publish; subscribers (state manager, coordinator, loggers)
/// receive inline. No lock is held during dispatch, so handlers may publish
/// further events or call back into the bus.
pub struct EventBus {
    handlers: RwLock<HashMap<SystemEvent, Vec<NamedHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a named handler to an event type
    ///
    /// Subscribing the same `handler_name` to the same event twice is a
    /// no-op; the original registration (and its order slot) is kept.
    pub fn subscribe(
        &self,
        event_type: SystemEvent,
        handler_name: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        let name = handler_name.into();
        let mut handlers = self.handlers.write().expect("event bus lock poisoned");
        let entry = handlers.entry(event_type).or_default();
        if entry.iter().any(|h| h.name == name) {
            debug!(%event_type, handler = %name, "subscribe: duplicate handler name, ignoring");
            return;
        }
        debug!(%event_type, handler = %name, "subscribe: handler registered");
        entry.push(NamedHandler {
            name,
            func: Arc::new(handler),
        });
    }

    /// Remove a named handler; returns whether it was present
    pub fn unsubscribe(&self, event_type: SystemEvent, handler_name: &str) -> bool {
        let mut handlers = self.handlers.write().expect("event bus lock poisoned");
        if let Some(entry) = handlers.get_mut(&event_type) {
            let before = entry.len();
            entry.retain(|h| h.name != handler_name);
            return entry.len() != before;
        }
        false
    }

    /// Publish an event to all subscribers of its type
    ///
    /// The handler list is snapshotted before dispatch; the bus holds no lock
    /// while handlers run. A panicking handler is logged and skipped.
    pub fn publish(&self, event_type: SystemEvent, data: serde_json::Value, source: &str) {
        let event = Event::new(event_type, data, source);
        self.dispatch(&event);
    }

    fn dispatch(&self, event: &Event) {
        let snapshot: Vec<NamedHandler> = {
            let handlers = self.handlers.read().expect("event bus lock poisoned");
            handlers.get(&event.event_type).cloned().unwrap_or_default()
        };

        debug!(
            event_type = %event.event_type,
            source = %event.source,
            subscribers = snapshot.len(),
            "publish"
        );

        for handler in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| (handler.func)(event)));
            if result.is_err() {
                error!(
                    event_type = %event.event_type,
                    handler = %handler.name,
                    "event handler panicked; continuing delivery"
                );
            }
        }
    }

    /// Number of handlers subscribed to an event type
    pub fn subscriber_count(&self, event_type: SystemEvent) -> usize {
        self.handlers
            .read()
            .expect("event bus lock poisoned")
            .get(&event_type)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
