//! Frontend bus - high-frequency UI tick events
//!
//! Same subscribe/publish shape as the main bus but keyed by event name,
//! synchronous-only with no queueing. Handlers are expected to return within
//! a few milliseconds; slower handlers trigger a warning but are not killed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

const SLOW_HANDLER_BUDGET: Duration = Duration::from_millis(5);

type FrontendHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Clone)]
struct Named {
    name: String,
    func: FrontendHandler,
}

/// Inline-dispatch bus for UI tick events (cursor, drag, animation frames)
pub struct FrontendBus {
    handlers: RwLock<HashMap<String, Vec<Named>>>,
}

impl FrontendBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(
        &self,
        event_name: &str,
        handler_name: impl Into<String>,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) {
        let name = handler_name.into();
        let mut handlers = self.handlers.write().expect("frontend bus lock poisoned");
        let entry = handlers.entry(event_name.to_string()).or_default();
        if entry.iter().any(|h| h.name == name) {
            return;
        }
        debug!(event = event_name, handler = %name, "frontend subscribe");
        entry.push(Named {
            name,
            func: Arc::new(handler),
        });
    }

    pub fn unsubscribe(&self, event_name: &str, handler_name: &str) -> bool {
        let mut handlers = self.handlers.write().expect("frontend bus lock poisoned");
        if let Some(entry) = handlers.get_mut(event_name) {
            let before = entry.len();
            entry.retain(|h| h.name != handler_name);
            return entry.len() != before;
        }
        false
    }

    /// Publish inline; each handler runs on the caller's thread
    pub fn publish(&self, event_name: &str, data: &Value) {
        let snapshot: Vec<Named> = {
            let handlers = self.handlers.read().expect("frontend bus lock poisoned");
            handlers.get(event_name).cloned().unwrap_or_default()
        };

        for handler in snapshot {
            let started = Instant::now();
            (handler.func)(event_name, data);
            let elapsed = started.elapsed();
            if elapsed > SLOW_HANDLER_BUDGET {
                warn!(
                    event = event_name,
                    handler = %handler.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "frontend handler exceeded 5ms budget"
                );
            }
        }
    }

    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .expect("frontend bus lock poisoned")
            .get(event_name)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for FrontendBus {
    fn default() -> Self {
        Self::new()
    }
}
