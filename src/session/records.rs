//! Session record store - append-only history of session triggers, status
//! transitions, and completion summaries
//!
//! Persisted to `memory/session_records.json` after every mutation, indexed
//! by record id, by business session id, and by session type. Save failures
//! are logged, never fatal; the in-memory state stays authoritative and the
//! next mutation retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::domain::SessionKind;

const STORE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub record_id: String,
    pub session_id: String,
    pub session_type: SessionKind,
    /// What started the session (trigger text, task definition, ...)
    pub trigger: Value,
    pub status_history: Vec<StatusTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Default)]
struct RecordsInner {
    records: HashMap<String, SessionRecord>,
    session_index: HashMap<String, String>,
    type_index: HashMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    records: HashMap<String, SessionRecord>,
    session_index: HashMap<String, String>,
    type_index: HashMap<String, Vec<String>>,
    metadata: StoreMetadata,
}

#[derive(Serialize, Deserialize)]
struct StoreMetadata {
    total_records: usize,
    last_saved: DateTime<Utc>,
    version: String,
}

pub struct SessionRecordStore {
    path: PathBuf,
    inner: Mutex<RecordsInner>,
}

impl SessionRecordStore {
    /// Open the store, loading any existing file at `path`
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = match Self::load(&path) {
            Some(inner) => {
                info!(
                    path = %path.display(),
                    records = inner.records.len(),
                    "session record store loaded"
                );
                inner
            }
            None => RecordsInner::default(),
        };
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    fn load(path: &Path) -> Option<RecordsInner> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<PersistedStore>(&content) {
            Ok(persisted) => Some(RecordsInner {
                records: persisted.records,
                session_index: persisted.session_index,
                type_index: persisted.type_index,
            }),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to parse session records");
                None
            }
        }
    }

    fn save(&self, inner: &RecordsInner) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let persisted = PersistedStore {
            records: inner.records.clone(),
            session_index: inner.session_index.clone(),
            type_index: inner.type_index.clone(),
            metadata: StoreMetadata {
                total_records: inner.records.len(),
                last_saved: Utc::now(),
                version: STORE_VERSION.to_string(),
            },
        };
        match serde_json::to_string_pretty(&persisted) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    error!(path = %self.path.display(), error = %e, "failed to save session records");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize session records"),
        }
    }

    /// Record a session start; returns the record id
    pub fn record_start(&self, session_id: &str, session_type: SessionKind, trigger: Value) -> String {
        let record_id = crate::domain::new_prefixed_id("rec_");
        let record = SessionRecord {
            record_id: record_id.clone(),
            session_id: session_id.to_string(),
            session_type,
            trigger,
            status_history: vec![StatusTransition {
                status: "active".to_string(),
                at: Utc::now(),
                reason: None,
            }],
            summary: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        let mut inner = self.inner.lock().expect("record store lock poisoned");
        inner.session_index.insert(session_id.to_string(), record_id.clone());
        inner
            .type_index
            .entry(session_type.as_str().to_string())
            .or_default()
            .push(record_id.clone());
        inner.records.insert(record_id.clone(), record);
        self.save(&inner);

        debug!(session_id, %record_id, "record_start");
        record_id
    }

    /// Append a status transition to the session's record
    pub fn record_transition(&self, session_id: &str, status: &str, reason: Option<&str>) {
        let mut inner = self.inner.lock().expect("record store lock poisoned");
        let Some(record_id) = inner.session_index.get(session_id).cloned() else {
            debug!(session_id, "record_transition: no record for session");
            return;
        };
        if let Some(record) = inner.records.get_mut(&record_id) {
            record.status_history.push(StatusTransition {
                status: status.to_string(),
                at: Utc::now(),
                reason: reason.map(str::to_string),
            });
        }
        self.save(&inner);
    }

    /// Attach the completion summary and mark the record completed
    pub fn record_completion(&self, session_id: &str, summary: Value) {
        let mut inner = self.inner.lock().expect("record store lock poisoned");
        let Some(record_id) = inner.session_index.get(session_id).cloned() else {
            return;
        };
        if let Some(record) = inner.records.get_mut(&record_id) {
            record.summary = Some(summary);
            record.completed_at = Some(Utc::now());
        }
        self.save(&inner);
    }

    pub fn by_session(&self, session_id: &str) -> Option<SessionRecord> {
        let inner = self.inner.lock().expect("record store lock poisoned");
        let record_id = inner.session_index.get(session_id)?;
        inner.records.get(record_id).cloned()
    }

    pub fn by_type(&self, session_type: SessionKind) -> Vec<SessionRecord> {
        let inner = self.inner.lock().expect("record store lock poisoned");
        inner
            .type_index
            .get(session_type.as_str())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, record_id: &str) -> Option<SessionRecord> {
        self.inner
            .lock()
            .expect("record store lock poisoned")
            .records
            .get(record_id)
            .cloned()
    }

    pub fn total_records(&self) -> usize {
        self.inner.lock().expect("record store lock poisoned").records.len()
    }

    /// Delete completed records older than the cutoff; returns removed count
    pub fn cleanup_old_records(&self, keep_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(keep_days);
        let mut inner = self.inner.lock().expect("record store lock poisoned");

        let doomed: Vec<String> = inner
            .records
            .values()
            .filter(|r| matches!(r.completed_at, Some(at) if at < cutoff))
            .map(|r| r.record_id.clone())
            .collect();

        for record_id in &doomed {
            if let Some(record) = inner.records.remove(record_id) {
                inner.session_index.remove(&record.session_id);
                if let Some(ids) = inner.type_index.get_mut(record.session_type.as_str()) {
                    ids.retain(|id| id != record_id);
                }
            }
        }

        if !doomed.is_empty() {
            info!(removed = doomed.len(), keep_days, "cleanup_old_records");
            self.save(&inner);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_record_lifecycle() {
        let temp = tempdir().unwrap();
        let store = SessionRecordStore::open(temp.path().join("session_records.json"));

        let record_id = store.record_start("cs_test", SessionKind::Chatting, json!({"trigger": "hello"}));
        store.record_transition("cs_test", "completed", Some("completed"));
        store.record_completion("cs_test", json!({"turns": 3}));

        let record = store.get(&record_id).unwrap();
        assert_eq!(record.session_id, "cs_test");
        assert_eq!(record.status_history.len(), 2);
        assert!(record.is_completed());
        assert_eq!(record.summary, Some(json!({"turns": 3})));
    }

    #[test]
    fn test_indexes() {
        let temp = tempdir().unwrap();
        let store = SessionRecordStore::open(temp.path().join("session_records.json"));

        store.record_start("gs_1", SessionKind::General, json!({}));
        store.record_start("ws_1", SessionKind::Workflow, json!({}));
        store.record_start("ws_2", SessionKind::Workflow, json!({}));

        assert!(store.by_session("ws_1").is_some());
        assert_eq!(store.by_type(SessionKind::Workflow).len(), 2);
        assert_eq!(store.by_type(SessionKind::General).len(), 1);
        assert_eq!(store.by_type(SessionKind::Chatting).len(), 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("session_records.json");
        {
            let store = SessionRecordStore::open(&path);
            store.record_start("cs_persist", SessionKind::Chatting, json!({"trigger": "hi"}));
        }
        let reopened = SessionRecordStore::open(&path);
        assert_eq!(reopened.total_records(), 1);
        assert!(reopened.by_session("cs_persist").is_some());

        // The on-disk shape matches the documented format
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("records").is_some());
        assert!(raw.get("session_index").is_some());
        assert!(raw.get("type_index").is_some());
        assert_eq!(raw["metadata"]["total_records"], json!(1));
        assert_eq!(raw["metadata"]["version"], json!("1.0"));
    }

    #[test]
    fn test_cleanup_keeps_recent_and_incomplete() {
        let temp = tempdir().unwrap();
        let store = SessionRecordStore::open(temp.path().join("session_records.json"));

        store.record_start("cs_old", SessionKind::Chatting, json!({}));
        store.record_completion("cs_old", json!({}));
        store.record_start("cs_open", SessionKind::Chatting, json!({}));

        // Backdate the completed record past the cutoff
        {
            let mut inner = store.inner.lock().unwrap();
            let record_id = inner.session_index.get("cs_old").cloned().unwrap();
            inner.records.get_mut(&record_id).unwrap().completed_at =
                Some(Utc::now() - Duration::days(40));
        }

        assert_eq!(store.cleanup_old_records(30), 1);
        assert!(store.by_session("cs_old").is_none());
        // Incomplete records survive regardless of age
        assert!(store.by_session("cs_open").is_some());
    }
}
