//! Session data type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{SessionKind, SessionStatus, new_prefixed_id};

/// An identified scope of interaction
///
/// `gs_` sessions are the root scope; `cs_` and `ws_` sessions are children
/// referencing their GS by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Free-form bag: `metadata`, `step_history`, identity context, ...
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Session {
    pub fn new(kind: SessionKind, parent_id: Option<String>, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            session_id: new_prefixed_id(kind.id_prefix()),
            kind,
            status: SessionStatus::Active,
            parent_id,
            created_at: now,
            last_activity: now,
            metadata,
        }
    }

    /// Update the activity clock (called on every inbound event for this session)
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Seconds since the last activity
    pub fn idle_secs(&self) -> i64 {
        (Utc::now() - self.last_activity).num_seconds()
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}
