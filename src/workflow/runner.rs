//! Workflow runner boundary and the built-in single-step runner

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::events::{EventBus, SystemEvent};
use crate::session::SessionManager;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("no workflow running for session {0}")]
    NotRunning(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("workflow action failed: {0}")]
    ActionFailed(String),
}

/// The `sys` module boundary the core drives workflows through
///
/// Cancellation is honoured between steps; there is no mid-step abort.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn start_workflow(&self, session_id: &str, workflow_name: &str, command: &str)
    -> Result<Value, WorkflowError>;

    async fn get_status(&self, session_id: &str) -> Result<Value, WorkflowError>;

    async fn review_step(&self, session_id: &str, step_id: &str) -> Result<Value, WorkflowError>;

    async fn approve_step(&self, session_id: &str, step_id: &str) -> Result<Value, WorkflowError>;

    async fn modify_step(&self, session_id: &str, step_id: &str, changes: Value) -> Result<Value, WorkflowError>;

    async fn cancel_workflow(&self, session_id: &str) -> Result<Value, WorkflowError>;

    async fn provide_input(&self, session_id: &str, input: Value) -> Result<Value, WorkflowError>;

    /// Whether a step is awaiting review/approval for this session
    fn has_pending_step(&self, session_id: &str) -> bool;
}

#[derive(Debug, Clone)]
struct RunState {
    workflow_name: String,
    command: String,
    status: &'static str,
}

/// Built-in runner that executes a workflow as a single completed step
///
/// Suits harnesses and workflows with no interactive review: `start` records
/// the run, publishes `WORKFLOW_STEP_COMPLETED`, and ends the WS so the
/// session-end path drives state completion.
pub struct ImmediateRunner {
    bus: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    runs: Mutex<HashMap<String, RunState>>,
}

impl ImmediateRunner {
    pub fn new(bus: Arc<EventBus>, sessions: Arc<SessionManager>) -> Self {
        Self {
            bus,
            sessions,
            runs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkflowRunner for ImmediateRunner {
    async fn start_workflow(
        &self,
        session_id: &str,
        workflow_name: &str,
        command: &str,
    ) -> Result<Value, WorkflowError> {
        info!(session_id, workflow_name, "workflow started");
        {
            let mut runs = self.runs.lock().expect("runner lock poisoned");
            runs.insert(
                session_id.to_string(),
                RunState {
                    workflow_name: workflow_name.to_string(),
                    command: command.to_string(),
                    status: "completed",
                },
            );
        }

        self.bus.publish(
            SystemEvent::WorkflowStepCompleted,
            json!({
                "session_id": session_id,
                "workflow": workflow_name,
                "step": "execute",
            }),
            "workflow_runner",
        );

        // Single-step run: the WS ends as soon as the step lands
        let _ = self.sessions.end_workflow_session(
            session_id,
            json!({"workflow": workflow_name, "status": "completed", "command": command}),
        );

        Ok(json!({
            "session_id": session_id,
            "workflow": workflow_name,
            "status": "completed",
        }))
    }

    async fn get_status(&self, session_id: &str) -> Result<Value, WorkflowError> {
        let runs = self.runs.lock().expect("runner lock poisoned");
        let run = runs
            .get(session_id)
            .ok_or_else(|| WorkflowError::NotRunning(session_id.to_string()))?;
        Ok(json!({
            "session_id": session_id,
            "workflow": run.workflow_name,
            "command": run.command,
            "status": run.status,
        }))
    }

    async fn review_step(&self, session_id: &str, step_id: &str) -> Result<Value, WorkflowError> {
        debug!(session_id, step_id, "review_step");
        Err(WorkflowError::StepNotFound(step_id.to_string()))
    }

    async fn approve_step(&self, session_id: &str, step_id: &str) -> Result<Value, WorkflowError> {
        debug!(session_id, step_id, "approve_step");
        Err(WorkflowError::StepNotFound(step_id.to_string()))
    }

    async fn modify_step(&self, session_id: &str, step_id: &str, _changes: Value) -> Result<Value, WorkflowError> {
        debug!(session_id, step_id, "modify_step");
        Err(WorkflowError::StepNotFound(step_id.to_string()))
    }

    async fn cancel_workflow(&self, session_id: &str) -> Result<Value, WorkflowError> {
        let existed = {
            let mut runs = self.runs.lock().expect("runner lock poisoned");
            runs.remove(session_id).is_some()
        };
        if !existed {
            return Err(WorkflowError::NotRunning(session_id.to_string()));
        }
        info!(session_id, "workflow cancelled");
        let _ = self
            .sessions
            .end_workflow_session(session_id, json!({"status": "cancelled"}));
        Ok(json!({"session_id": session_id, "status": "cancelled"}))
    }

    async fn provide_input(&self, session_id: &str, _input: Value) -> Result<Value, WorkflowError> {
        Err(WorkflowError::NotRunning(session_id.to_string()))
    }

    fn has_pending_step(&self, _session_id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_bus;
    use crate::session::SessionRecordStore;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn setup() -> (Arc<EventBus>, Arc<SessionManager>, ImmediateRunner, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let bus = create_event_bus();
        let sessions = Arc::new(SessionManager::new(
            bus.clone(),
            SessionRecordStore::open(temp.path().join("records.json")),
        ));
        let runner = ImmediateRunner::new(bus.clone(), sessions.clone());
        (bus, sessions, runner, temp)
    }

    #[tokio::test]
    async fn test_start_completes_and_ends_ws() {
        let (bus, sessions, runner, _temp) = setup();
        let steps = Arc::new(AtomicUsize::new(0));
        let steps_clone = steps.clone();
        bus.subscribe(SystemEvent::WorkflowStepCompleted, "counter", move |_| {
            steps_clone.fetch_add(1, Ordering::SeqCst);
        });

        let gs = sessions.create_general_session(Map::new()).unwrap();
        let ws = sessions
            .create_workflow_session(&gs, crate::domain::WsTaskType::WorkflowAutomation, json!({}))
            .unwrap();

        let result = runner.start_workflow(&ws, "get_weather", "weather in Taipei").await.unwrap();
        assert_eq!(result["status"], json!("completed"));
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        // The WS ended with the step
        assert!(!sessions.get(&ws).unwrap().is_live());
    }

    #[tokio::test]
    async fn test_status_and_cancel() {
        let (_bus, sessions, runner, _temp) = setup();
        let gs = sessions.create_general_session(Map::new()).unwrap();
        let ws = sessions
            .create_workflow_session(&gs, crate::domain::WsTaskType::WorkflowAutomation, json!({}))
            .unwrap();

        assert!(matches!(
            runner.get_status(&ws).await,
            Err(WorkflowError::NotRunning(_))
        ));
        runner.start_workflow(&ws, "code_analysis", "analyze").await.unwrap();
        let status = runner.get_status(&ws).await.unwrap();
        assert_eq!(status["workflow"], json!("code_analysis"));

        runner.cancel_workflow(&ws).await.unwrap();
        assert!(matches!(
            runner.get_status(&ws).await,
            Err(WorkflowError::NotRunning(_))
        ));
    }
}
