//! SessionManager - lifecycle for General, Chatting, and Workflow sessions
//!
//! Invariants enforced here:
//! - at most one active GS at a time;
//! - CS/WS are children of a GS and cannot exist without one;
//! - at most one active CS per GS; multiple WS may coexist.
//!
//! Ending a GS cascades to its live children (reason `parent_ended`) before
//! the GS itself ends. A timeout sweeper ends sessions whose inactivity
//! exceeds the configured maximum. Every start/end publishes
//! `SESSION_STARTED` / `SESSION_ENDED` on the main bus; events are published
//! after the session lock is released so subscribers may call back in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{EndReason, SessionKind, SessionStatus, WsTaskType};
use crate::events::{EventBus, SystemEvent};

use super::records::SessionRecordStore;
use super::types::Session;

/// Default inactivity limit: one day
pub const DEFAULT_MAX_SESSION_AGE_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a general session is already active: {0}")]
    AlreadyActive(String),

    #[error("no active general session {0}")]
    NoParent(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {id} is not a {expected} session")]
    WrongKind { id: String, expected: &'static str },
}

#[derive(Default)]
struct SessionsInner {
    sessions: HashMap<String, Session>,
    current_gs: Option<String>,
}

impl SessionsInner {
    fn live_children(&self, gs_id: &str, kind: SessionKind) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.kind == kind && s.is_live() && s.parent_id.as_deref() == Some(gs_id))
            .map(|s| s.session_id.clone())
            .collect()
    }
}

pub struct SessionManager {
    bus: Arc<EventBus>,
    records: SessionRecordStore,
    inner: Mutex<SessionsInner>,
    max_session_age_secs: AtomicU64,
}

impl SessionManager {
    pub fn new(bus: Arc<EventBus>, records: SessionRecordStore) -> Self {
        Self {
            bus,
            records,
            inner: Mutex::new(SessionsInner::default()),
            max_session_age_secs: AtomicU64::new(DEFAULT_MAX_SESSION_AGE_SECS),
        }
    }

    /// Inactivity limit in seconds; sessions idle longer are force-ended
    pub fn set_max_session_age(&self, secs: u64) {
        self.max_session_age_secs.store(secs, Ordering::SeqCst);
    }

    pub fn max_session_age(&self) -> u64 {
        self.max_session_age_secs.load(Ordering::SeqCst)
    }

    fn publish_started(&self, session: &Session) {
        self.bus.publish(
            SystemEvent::SessionStarted,
            json!({
                "session_id": session.session_id,
                "session_type": session.kind.as_str(),
                "parent_id": session.parent_id,
            }),
            "session_manager",
        );
    }

    fn publish_ended(&self, session_id: &str, kind: SessionKind, reason: EndReason) {
        self.bus.publish(
            SystemEvent::SessionEnded,
            json!({
                "session_id": session_id,
                "session_type": kind.as_str(),
                "reason": reason.as_str(),
            }),
            "session_manager",
        );
    }

    // === General sessions ===

    /// Create the root General Session; fails if one is already active
    pub fn create_general_session(&self, initial_metadata: Map<String, Value>) -> Result<String, SessionError> {
        let session = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if let Some(gs_id) = &inner.current_gs {
                return Err(SessionError::AlreadyActive(gs_id.clone()));
            }
            let session = Session::new(SessionKind::General, None, initial_metadata);
            inner.current_gs = Some(session.session_id.clone());
            inner.sessions.insert(session.session_id.clone(), session.clone());
            session
        };

        info!(session_id = %session.session_id, "general session started");
        self.records.record_start(
            &session.session_id,
            SessionKind::General,
            Value::Object(session.metadata.clone()),
        );
        self.publish_started(&session);
        Ok(session.session_id)
    }

    /// End the active GS, cascading to live children first
    pub fn end_general_session(&self, summary: &str) -> Result<(), SessionError> {
        let gs_id = {
            let inner = self.inner.lock().expect("session lock poisoned");
            inner
                .current_gs
                .clone()
                .ok_or_else(|| SessionError::NoParent("(none active)".to_string()))?
        };

        // Children end first so their SESSION_ENDED precedes the GS's
        let children: Vec<(String, SessionKind)> = {
            let inner = self.inner.lock().expect("session lock poisoned");
            let mut children: Vec<(String, SessionKind)> = inner
                .live_children(&gs_id, SessionKind::Chatting)
                .into_iter()
                .map(|id| (id, SessionKind::Chatting))
                .collect();
            children.extend(
                inner
                    .live_children(&gs_id, SessionKind::Workflow)
                    .into_iter()
                    .map(|id| (id, SessionKind::Workflow)),
            );
            children
        };
        for (child_id, _) in &children {
            self.end_session(child_id, EndReason::ParentEnded)?;
        }

        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if let Some(session) = inner.sessions.get_mut(&gs_id) {
                session.status = SessionStatus::Completed;
            }
            inner.current_gs = None;
        }
        info!(session_id = %gs_id, "general session ended");
        self.records.record_transition(&gs_id, "completed", Some("completed"));
        self.records.record_completion(&gs_id, json!({"summary": summary}));
        self.publish_ended(&gs_id, SessionKind::General, EndReason::Completed);
        Ok(())
    }

    // === Chatting sessions ===

    /// Create a CS under the given GS
    ///
    /// Fails with `NoParent` if the GS does not exist or is not active, and
    /// with `AlreadyActive` if a CS is already active under it.
    pub fn create_chatting_session(
        &self,
        gs_session_id: &str,
        identity_context: Value,
    ) -> Result<String, SessionError> {
        let session = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            let gs_live = inner
                .sessions
                .get(gs_session_id)
                .map(|s| s.kind == SessionKind::General && s.is_live())
                .unwrap_or(false);
            if !gs_live {
                return Err(SessionError::NoParent(gs_session_id.to_string()));
            }
            if let Some(cs_id) = inner.live_children(gs_session_id, SessionKind::Chatting).first() {
                return Err(SessionError::AlreadyActive(cs_id.clone()));
            }

            let mut metadata = Map::new();
            metadata.insert("identity_context".to_string(), identity_context);
            let session = Session::new(SessionKind::Chatting, Some(gs_session_id.to_string()), metadata);
            inner.sessions.insert(session.session_id.clone(), session.clone());
            session
        };

        info!(session_id = %session.session_id, parent = gs_session_id, "chatting session started");
        self.records.record_start(
            &session.session_id,
            SessionKind::Chatting,
            Value::Object(session.metadata.clone()),
        );
        self.publish_started(&session);
        Ok(session.session_id)
    }

    /// End a CS with reason `completed`; `save_memory` is carried to the record
    pub fn end_chatting_session(&self, session_id: &str, save_memory: bool) -> Result<(), SessionError> {
        self.end_chatting_session_with_reason(session_id, save_memory, EndReason::Completed)
    }

    pub fn end_chatting_session_with_reason(
        &self,
        session_id: &str,
        save_memory: bool,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        {
            let inner = self.inner.lock().expect("session lock poisoned");
            match inner.sessions.get(session_id) {
                Some(s) if s.kind == SessionKind::Chatting => {}
                Some(_) => {
                    return Err(SessionError::WrongKind {
                        id: session_id.to_string(),
                        expected: "chatting",
                    });
                }
                None => return Err(SessionError::NotFound(session_id.to_string())),
            }
        }
        self.records
            .record_completion(session_id, json!({"save_memory": save_memory}));
        self.end_session(session_id, reason)
    }

    // === Workflow sessions ===

    /// Create a WS under the given GS; many may coexist
    ///
    /// `SYSTEM_NOTIFICATION` sessions are the vehicle for background system
    /// reports and never start a workflow engine.
    pub fn create_workflow_session(
        &self,
        gs_session_id: &str,
        task_type: WsTaskType,
        task_definition: Value,
    ) -> Result<String, SessionError> {
        let session = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            let gs_live = inner
                .sessions
                .get(gs_session_id)
                .map(|s| s.kind == SessionKind::General && s.is_live())
                .unwrap_or(false);
            if !gs_live {
                return Err(SessionError::NoParent(gs_session_id.to_string()));
            }

            let mut metadata = Map::new();
            metadata.insert("task_type".to_string(), json!(task_type.as_str()));
            metadata.insert("task_definition".to_string(), task_definition);
            metadata.insert("step_history".to_string(), json!([]));
            let session = Session::new(SessionKind::Workflow, Some(gs_session_id.to_string()), metadata);
            inner.sessions.insert(session.session_id.clone(), session.clone());
            session
        };

        info!(
            session_id = %session.session_id,
            parent = gs_session_id,
            task_type = task_type.as_str(),
            "workflow session started"
        );
        self.records.record_start(
            &session.session_id,
            SessionKind::Workflow,
            Value::Object(session.metadata.clone()),
        );
        self.publish_started(&session);
        Ok(session.session_id)
    }

    pub fn end_workflow_session(&self, session_id: &str, result: Value) -> Result<(), SessionError> {
        let reason = {
            let inner = self.inner.lock().expect("session lock poisoned");
            match inner.sessions.get(session_id) {
                Some(s) if s.kind == SessionKind::Workflow => {}
                Some(_) => {
                    return Err(SessionError::WrongKind {
                        id: session_id.to_string(),
                        expected: "workflow",
                    });
                }
                None => return Err(SessionError::NotFound(session_id.to_string())),
            }
            if result.get("error").is_some() {
                EndReason::Error
            } else {
                EndReason::Completed
            }
        };
        self.records.record_completion(session_id, result);
        self.end_session(session_id, reason)
    }

    // === Shared lifecycle ===

    /// End any live session with the given reason
    pub fn end_session(&self, session_id: &str, reason: EndReason) -> Result<(), SessionError> {
        let kind = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            if !session.is_live() {
                debug!(session_id, "end_session: already ended");
                return Ok(());
            }
            session.status = match reason {
                EndReason::Error => SessionStatus::Error,
                EndReason::Timeout => SessionStatus::Terminated,
                _ => SessionStatus::Completed,
            };
            let kind = session.kind;
            if kind == SessionKind::General && inner.current_gs.as_deref() == Some(session_id) {
                inner.current_gs = None;
            }
            kind
        };

        info!(session_id, %reason, kind = kind.as_str(), "session ended");
        self.records
            .record_transition(session_id, "ended", Some(reason.as_str()));
        self.publish_ended(session_id, kind, reason);
        Ok(())
    }

    /// Update a session's activity clock
    pub fn touch(&self, session_id: &str) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.touch();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .sessions
            .get(session_id)
            .cloned()
    }

    pub fn current_general(&self) -> Option<Session> {
        let inner = self.inner.lock().expect("session lock poisoned");
        let gs_id = inner.current_gs.as_ref()?;
        inner.sessions.get(gs_id).cloned()
    }

    /// The active CS under the current GS, if any
    pub fn current_chatting(&self) -> Option<Session> {
        let inner = self.inner.lock().expect("session lock poisoned");
        let gs_id = inner.current_gs.clone()?;
        let cs_id = inner.live_children(&gs_id, SessionKind::Chatting).into_iter().next()?;
        inner.sessions.get(&cs_id).cloned()
    }

    /// All live WS ids under the current GS
    pub fn active_workflow_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("session lock poisoned");
        match &inner.current_gs {
            Some(gs_id) => inner.live_children(gs_id, SessionKind::Workflow),
            None => Vec::new(),
        }
    }

    pub fn records(&self) -> &SessionRecordStore {
        &self.records
    }

    /// End every session idle past the limit; returns the ended ids
    pub fn sweep_timeouts(&self) -> Vec<String> {
        let limit = self.max_session_age() as i64;
        let expired: Vec<String> = {
            let inner = self.inner.lock().expect("session lock poisoned");
            inner
                .sessions
                .values()
                .filter(|s| s.is_live() && s.idle_secs() > limit)
                .map(|s| s.session_id.clone())
                .collect()
        };

        for session_id in &expired {
            warn!(%session_id, limit_secs = limit, "session timed out");
            let _ = self.end_session(session_id, EndReason::Timeout);
        }
        expired
    }
}

/// Run the timeout sweeper on a fixed one-second schedule
pub fn spawn_timeout_sweeper(manager: Arc<SessionManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            manager.sweep_timeouts();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_bus;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn manager() -> (Arc<SessionManager>, Arc<EventBus>, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let bus = create_event_bus();
        let records = SessionRecordStore::open(temp.path().join("session_records.json"));
        (Arc::new(SessionManager::new(bus.clone(), records)), bus, temp)
    }

    #[test]
    fn test_single_general_session_invariant() {
        let (manager, _bus, _temp) = manager();
        manager.create_general_session(Map::new()).unwrap();
        let err = manager.create_general_session(Map::new()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(_)));
    }

    #[test]
    fn test_cs_requires_gs() {
        let (manager, _bus, _temp) = manager();
        let err = manager
            .create_chatting_session("gs_missing", json!({}))
            .unwrap_err();
        assert!(matches!(err, SessionError::NoParent(_)));
    }

    #[test]
    fn test_single_cs_per_gs_invariant() {
        let (manager, _bus, _temp) = manager();
        let gs = manager.create_general_session(Map::new()).unwrap();
        manager.create_chatting_session(&gs, json!({})).unwrap();
        let err = manager.create_chatting_session(&gs, json!({})).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(_)));
    }

    #[test]
    fn test_multiple_workflow_sessions_allowed() {
        let (manager, _bus, _temp) = manager();
        let gs = manager.create_general_session(Map::new()).unwrap();
        manager
            .create_workflow_session(&gs, WsTaskType::WorkflowAutomation, json!({"command": "a"}))
            .unwrap();
        manager
            .create_workflow_session(&gs, WsTaskType::WorkflowAutomation, json!({"command": "b"}))
            .unwrap();
        assert_eq!(manager.active_workflow_ids().len(), 2);
    }

    #[test]
    fn test_gs_end_cascades_with_parent_ended() {
        let (manager, bus, _temp) = manager();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let reasons_clone = reasons.clone();
        bus.subscribe(SystemEvent::SessionEnded, "recorder", move |event| {
            reasons_clone.lock().unwrap().push((
                event.str_field("session_type").unwrap().to_string(),
                event.str_field("reason").unwrap().to_string(),
            ));
        });

        let gs = manager.create_general_session(Map::new()).unwrap();
        manager.create_chatting_session(&gs, json!({})).unwrap();
        manager
            .create_workflow_session(&gs, WsTaskType::WorkflowAutomation, json!({}))
            .unwrap();
        manager.end_general_session("done").unwrap();

        let reasons = reasons.lock().unwrap();
        assert_eq!(reasons.len(), 3);
        // Children end first, GS last
        assert!(reasons[..2]
            .iter()
            .all(|(_, reason)| reason == "parent_ended"));
        assert_eq!(reasons[2], ("general".to_string(), "completed".to_string()));
        assert!(manager.current_general().is_none());
    }

    #[test]
    fn test_cs_end_publishes_session_ended() {
        let (manager, bus, _temp) = manager();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(SystemEvent::SessionEnded, "counter", move |event| {
            if event.str_field("session_type") == Some("chatting") {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let gs = manager.create_general_session(Map::new()).unwrap();
        let cs = manager.create_chatting_session(&gs, json!({})).unwrap();
        manager.end_chatting_session(&cs, true).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.current_chatting().is_none());
        // A new CS may now start under the same GS
        manager.create_chatting_session(&gs, json!({})).unwrap();
    }

    #[test]
    fn test_end_session_idempotent() {
        let (manager, _bus, _temp) = manager();
        let gs = manager.create_general_session(Map::new()).unwrap();
        let cs = manager.create_chatting_session(&gs, json!({})).unwrap();
        manager.end_session(&cs, EndReason::Completed).unwrap();
        // Second end is a no-op, not an error
        manager.end_session(&cs, EndReason::Completed).unwrap();
    }

    #[test]
    fn test_sweep_ends_idle_sessions() {
        let (manager, bus, _temp) = manager();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let reasons_clone = reasons.clone();
        bus.subscribe(SystemEvent::SessionEnded, "recorder", move |event| {
            reasons_clone
                .lock()
                .unwrap()
                .push(event.str_field("reason").unwrap().to_string());
        });

        let gs = manager.create_general_session(Map::new()).unwrap();
        let cs = manager.create_chatting_session(&gs, json!({})).unwrap();

        // max_session_age = 0: everything is expired on the next sweep
        manager.set_max_session_age(0);
        std::thread::sleep(Duration::from_millis(1100));
        let expired = manager.sweep_timeouts();

        assert!(expired.contains(&cs));
        assert!(reasons.lock().unwrap().iter().all(|r| r == "timeout"));
        assert!(manager.current_chatting().is_none());
    }

    #[test]
    fn test_touch_defers_timeout() {
        let (manager, _bus, _temp) = manager();
        let gs = manager.create_general_session(Map::new()).unwrap();
        manager.set_max_session_age(3600);
        manager.touch(&gs);
        assert!(manager.sweep_timeouts().is_empty());
    }

    #[test]
    fn test_ws_error_result_ends_with_error_reason() {
        let (manager, bus, _temp) = manager();
        let reason = Arc::new(Mutex::new(String::new()));
        let reason_clone = reason.clone();
        bus.subscribe(SystemEvent::SessionEnded, "recorder", move |event| {
            if event.str_field("session_type") == Some("workflow") {
                *reason_clone.lock().unwrap() = event.str_field("reason").unwrap().to_string();
            }
        });

        let gs = manager.create_general_session(Map::new()).unwrap();
        let ws = manager
            .create_workflow_session(&gs, WsTaskType::WorkflowAutomation, json!({}))
            .unwrap();
        manager
            .end_workflow_session(&ws, json!({"error": "tool failed"}))
            .unwrap();

        assert_eq!(reason.lock().unwrap().as_str(), "error");
        let session = manager.get(&ws).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
    }
}
