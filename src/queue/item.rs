//! State queue item and enqueue request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{UepState, WorkMode};

/// A pending or executing state in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateQueueItem {
    pub state: UepState,
    /// Human-readable origin text, e.g. "intent segment 3: ..."
    pub trigger_content: String,
    /// The text the state must actually process
    pub context_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_user: Option<String>,
    /// Higher runs first; ties break by insertion order
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_mode: Option<WorkMode>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StateQueueItem {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Parameters for `StateQueue::add_state`
#[derive(Debug, Clone)]
pub struct StateRequest {
    pub state: UepState,
    pub trigger_content: String,
    pub context_content: Option<String>,
    pub trigger_user: Option<String>,
    pub work_mode: Option<WorkMode>,
    pub metadata: Map<String, Value>,
    pub custom_priority: Option<i32>,
}

impl StateRequest {
    pub fn new(state: UepState, trigger_content: impl Into<String>) -> Self {
        Self {
            state,
            trigger_content: trigger_content.into(),
            context_content: None,
            trigger_user: None,
            work_mode: None,
            metadata: Map::new(),
            custom_priority: None,
        }
    }

    pub fn context(mut self, content: impl Into<String>) -> Self {
        self.context_content = Some(content.into());
        self
    }

    pub fn trigger_user(mut self, user: impl Into<String>) -> Self {
        self.trigger_user = Some(user.into());
        self
    }

    pub fn work_mode(mut self, mode: WorkMode) -> Self {
        self.work_mode = Some(mode);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.custom_priority = Some(priority);
        self
    }

    /// Effective priority after default table and work-mode adjustments
    ///
    /// A caller-supplied priority overrides everything; otherwise `direct`
    /// work coerces upward to at least 100 and `background` clamps at 30.
    pub fn effective_priority(&self) -> i32 {
        if let Some(custom) = self.custom_priority {
            return custom;
        }
        let base = self.state.default_priority();
        match self.work_mode {
            Some(WorkMode::Direct) => base.max(100),
            Some(WorkMode::Background) => base.min(30),
            None => base,
        }
    }

    pub fn into_item(self) -> StateQueueItem {
        let priority = self.effective_priority();
        StateQueueItem {
            state: self.state,
            context_content: self
                .context_content
                .unwrap_or_else(|| self.trigger_content.clone()),
            trigger_content: self.trigger_content,
            trigger_user: self.trigger_user,
            priority,
            work_mode: self.work_mode,
            metadata: self.metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
