//! Shared status model: mood, pride, helpfulness, boredom
//!
//! Values are clamped to [-1, 1] (boredom to [0, 1]). Helpfulness supports a
//! suppression override (MISCHIEF sets it to -1 without losing the natural
//! value). Registered callbacks fire on every field update; the state manager
//! uses them to check special-state entry conditions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Point-in-time view of the status fields
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub mood: f64,
    pub pride: f64,
    pub helpfulness: f64,
    pub boredom: f64,
    /// Unix seconds of the last user interaction
    pub last_interaction_time: f64,
}

struct StatusInner {
    mood: f64,
    pride: f64,
    natural_helpfulness: f64,
    helpfulness_override: Option<f64>,
    boredom: f64,
    last_interaction_time: f64,
}

type UpdateCallback = Arc<dyn Fn(&str, f64, f64, &str) + Send + Sync>;

pub struct StatusModel {
    inner: Mutex<StatusInner>,
    callbacks: RwLock<HashMap<String, UpdateCallback>>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl StatusModel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                mood: 0.0,
                pride: 0.0,
                natural_helpfulness: 0.8,
                helpfulness_override: None,
                boredom: 0.0,
                last_interaction_time: now_secs(),
            }),
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().expect("status lock poisoned");
        StatusSnapshot {
            mood: inner.mood,
            pride: inner.pride,
            helpfulness: inner.helpfulness_override.unwrap_or(inner.natural_helpfulness),
            boredom: inner.boredom,
            last_interaction_time: inner.last_interaction_time,
        }
    }

    /// Register a callback invoked as (field, old, new, reason) on each update
    pub fn register_update_callback(
        &self,
        name: &str,
        callback: impl Fn(&str, f64, f64, &str) + Send + Sync + 'static,
    ) {
        self.callbacks
            .write()
            .expect("status callbacks lock poisoned")
            .insert(name.to_string(), Arc::new(callback));
    }

    fn notify(&self, field: &str, old: f64, new: f64, reason: &str) {
        let callbacks: Vec<UpdateCallback> = self
            .callbacks
            .read()
            .expect("status callbacks lock poisoned")
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(field, old, new, reason);
        }
    }

    pub fn update_mood(&self, delta: f64, reason: &str) {
        let (old, new) = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.mood;
            inner.mood = (inner.mood + delta).clamp(-1.0, 1.0);
            (old, inner.mood)
        };
        debug!(old, new, reason, "update_mood");
        self.notify("mood", old, new, reason);
    }

    pub fn update_pride(&self, delta: f64, reason: &str) {
        let (old, new) = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.pride;
            inner.pride = (inner.pride + delta).clamp(-1.0, 1.0);
            (old, inner.pride)
        };
        self.notify("pride", old, new, reason);
    }

    pub fn update_helpfulness(&self, delta: f64, reason: &str) {
        let (old, new) = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.natural_helpfulness;
            inner.natural_helpfulness = (inner.natural_helpfulness + delta).clamp(-1.0, 1.0);
            (old, inner.natural_helpfulness)
        };
        self.notify("helpfulness", old, new, reason);
    }

    pub fn update_boredom(&self, delta: f64, reason: &str) {
        let (old, new) = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.boredom;
            inner.boredom = (inner.boredom + delta).clamp(0.0, 1.0);
            (old, inner.boredom)
        };
        self.notify("boredom", old, new, reason);
    }

    /// Override helpfulness to -1 without touching the natural value
    pub fn suppress_helpfulness(&self, reason: &str) {
        let old = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.helpfulness_override.unwrap_or(inner.natural_helpfulness);
            inner.helpfulness_override = Some(-1.0);
            old
        };
        debug!(reason, "suppress_helpfulness");
        self.notify("helpfulness", old, -1.0, reason);
    }

    /// Drop the suppression; helpfulness reads its natural value again
    pub fn clear_helpfulness_override(&self, reason: &str) {
        let (old, new) = {
            let mut inner = self.inner.lock().expect("status lock poisoned");
            let old = inner.helpfulness_override.unwrap_or(inner.natural_helpfulness);
            inner.helpfulness_override = None;
            (old, inner.natural_helpfulness)
        };
        debug!(reason, "clear_helpfulness_override");
        self.notify("helpfulness", old, new, reason);
    }

    /// Record a user interaction (resets the inactivity clock)
    pub fn mark_interaction(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.last_interaction_time = now_secs();
    }

    #[cfg(test)]
    pub fn backdate_interaction(&self, secs_ago: f64) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.last_interaction_time = now_secs() - secs_ago;
    }
}

impl Default for StatusModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let status = StatusModel::new().snapshot();
        assert_eq!(status.mood, 0.0);
        assert_eq!(status.helpfulness, 0.8);
        assert_eq!(status.boredom, 0.0);
    }

    #[test]
    fn test_clamping() {
        let status = StatusModel::new();
        status.update_mood(5.0, "test");
        assert_eq!(status.snapshot().mood, 1.0);
        status.update_mood(-10.0, "test");
        assert_eq!(status.snapshot().mood, -1.0);
        status.update_boredom(-1.0, "test");
        assert_eq!(status.snapshot().boredom, 0.0);
    }

    #[test]
    fn test_suppress_and_restore_helpfulness() {
        let status = StatusModel::new();
        status.suppress_helpfulness("enter_mischief");
        assert_eq!(status.snapshot().helpfulness, -1.0);

        // Natural value survives underneath the override
        status.clear_helpfulness_override("leave_mischief");
        assert_eq!(status.snapshot().helpfulness, 0.8);
    }

    #[test]
    fn test_callbacks_fire_on_update() {
        let status = StatusModel::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        status.register_update_callback("counter", move |field, _, _, _| {
            if field == "boredom" {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        status.update_boredom(0.1, "tick");
        status.update_mood(0.1, "tick");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interaction_clock() {
        let status = StatusModel::new();
        status.backdate_interaction(1000.0);
        let before = status.snapshot().last_interaction_time;
        status.mark_interaction();
        assert!(status.snapshot().last_interaction_time > before);
    }
}
