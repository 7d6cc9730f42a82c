//! StateManager - translates state transitions into sessions and
//! special-state side effects
//!
//! Architecture: states create sessions (state -> session); session endings
//! complete states (session end -> state complete, via `SESSION_ENDED`). The
//! manager never promotes queue items itself - IDLE transitions are
//! centralised in the System Loop, and the queue's own idle transition
//! arrives here as a `STATE_CHANGED` observation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::context::WorkingContext;
use crate::coordinator::ModuleCoordinator;
use crate::domain::{SessionKind, UepState, WsTaskType};
use crate::events::{Event, EventBus, SystemEvent};
use crate::modules::ModuleRegistry;
use crate::queue::{StateQueue, StateQueueItem};
use crate::session::SessionManager;
use crate::status::StatusModel;

#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Gates MISCHIEF so tests and production can differ
    pub mischief_enabled: bool,
    pub sleep_boredom_threshold: f64,
    pub sleep_inactivity_secs: f64,
    /// Debounce between special-state condition checks
    pub condition_debounce: Duration,
    /// Path of `memory/sleep_context.json`
    pub sleep_context_path: PathBuf,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            mischief_enabled: false,
            sleep_boredom_threshold: 0.8,
            sleep_inactivity_secs: 1800.0,
            condition_debounce: Duration::from_secs(1),
            sleep_context_path: PathBuf::from("memory/sleep_context.json"),
        }
    }
}

/// Context carried into a state change
#[derive(Debug, Clone, Default)]
pub struct StateChangeContext {
    pub text: Option<String>,
    pub workflow_type: Option<String>,
    pub system_report: bool,
    pub metadata: Map<String, Value>,
}

impl StateChangeContext {
    pub fn from_item(item: &StateQueueItem) -> Self {
        let workflow_type = item.meta_str("workflow_type").map(str::to_string);
        let system_report =
            workflow_type.as_deref() == Some("system_report") || item.meta_bool("system_report");
        Self {
            text: Some(item.context_content.clone()),
            workflow_type,
            system_report,
            metadata: item.metadata.clone(),
        }
    }
}

struct StateInner {
    state: UepState,
    current_session_id: Option<String>,
    last_condition_check: Option<Instant>,
    sleep_unloaded: Vec<String>,
}

pub struct StateManager {
    bus: Arc<EventBus>,
    context: Arc<WorkingContext>,
    sessions: Arc<SessionManager>,
    status: Arc<StatusModel>,
    queue: Arc<StateQueue>,
    coordinator: Arc<ModuleCoordinator>,
    registry: Arc<ModuleRegistry>,
    config: StateManagerConfig,
    inner: Mutex<StateInner>,
}

#[allow(clippy::too_many_arguments)]
impl StateManager {
    pub fn new(
        bus: Arc<EventBus>,
        context: Arc<WorkingContext>,
        sessions: Arc<SessionManager>,
        status: Arc<StatusModel>,
        queue: Arc<StateQueue>,
        coordinator: Arc<ModuleCoordinator>,
        registry: Arc<ModuleRegistry>,
        config: StateManagerConfig,
    ) -> Self {
        Self {
            bus,
            context,
            sessions,
            status,
            queue,
            coordinator,
            registry,
            config,
            inner: Mutex::new(StateInner {
                state: UepState::Idle,
                current_session_id: None,
                last_condition_check: None,
                sleep_unloaded: Vec::new(),
            }),
        }
    }

    pub fn current_state(&self) -> UepState {
        self.inner.lock().expect("state lock poisoned").state
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .current_session_id
            .clone()
    }

    /// Set a new state and run its side effects
    ///
    /// Re-entering the same state with no context is a successful no-op;
    /// with a context it re-runs the side effects (WORK -> WORK spawns a new
    /// WS). On a contract error the state rolls back and the queue is told
    /// the state failed.
    pub fn set_state(&self, new_state: UepState, context: Option<StateChangeContext>) -> bool {
        let old_state = {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            if inner.state == new_state && context.is_none() {
                return true;
            }
            let old = inner.state;
            inner.state = new_state;
            old
        };

        if old_state != new_state {
            debug!(old = %old_state, new = %new_state, "state changed");
        } else {
            debug!(state = %new_state, "re-entering state with fresh context");
        }

        let result = match new_state {
            UepState::Chat => self.handle_chat(context),
            UepState::Work => self.handle_work(context),
            UepState::Idle => {
                self.clear_session_ref();
                Ok(())
            }
            UepState::Mischief => self.handle_mischief(context),
            UepState::Sleep => self.handle_sleep(context),
            UepState::Error => {
                self.clear_session_ref();
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                self.bus.publish(
                    SystemEvent::StateChanged,
                    json!({"old_state": old_state.as_str(), "new_state": new_state.as_str()}),
                    "state_manager",
                );
                true
            }
            Err(e) => {
                error!(state = %new_state, error = %e, "state transition failed, rolling back");
                self.inner.lock().expect("state lock poisoned").state = old_state;
                self.queue
                    .complete_current_state(false, Some(json!({"error": e})), None);
                false
            }
        }
    }

    fn clear_session_ref(&self) {
        self.inner.lock().expect("state lock poisoned").current_session_id = None;
    }

    fn ensure_gs(&self) -> Result<String, String> {
        if let Some(gs) = self.sessions.current_general() {
            return Ok(gs.session_id);
        }
        debug!("no active GS, creating one");
        let mut metadata = Map::new();
        metadata.insert("created_by".to_string(), json!("state_manager"));
        self.sessions
            .create_general_session(metadata)
            .map_err(|e| e.to_string())
    }

    fn handle_chat(&self, context: Option<StateChangeContext>) -> Result<(), String> {
        let _ = context;
        let gs_id = self.ensure_gs()?;

        let identity_context = match self.context.current_identity() {
            Some(identity) => json!({
                "identity_id": identity.identity_id,
                "display_name": identity.display_name,
                "memory_token": identity.memory_token,
            }),
            None => json!({"identity_id": "default_user"}),
        };

        let cs_id = self
            .sessions
            .create_chatting_session(&gs_id, identity_context)
            .map_err(|e| e.to_string())?;
        info!(session_id = %cs_id, "chat state created CS");
        self.inner.lock().expect("state lock poisoned").current_session_id = Some(cs_id);
        // Completion arrives via SESSION_ENDED, never invoked from here
        Ok(())
    }

    fn handle_work(&self, context: Option<StateChangeContext>) -> Result<(), String> {
        let context = context.unwrap_or_default();
        let gs_id = self.ensure_gs()?;
        let command = context.text.clone().unwrap_or_else(|| "unknown command".to_string());

        if context.system_report {
            // System reports get a WS shell but no workflow engine; content
            // fast-paths into the processing layer
            let ws_id = self
                .sessions
                .create_workflow_session(
                    &gs_id,
                    WsTaskType::SystemNotification,
                    json!({"command": command, "initial_data": Value::Object(context.metadata.clone())}),
                )
                .map_err(|e| e.to_string())?;
            info!(session_id = %ws_id, "system notification WS created");
            self.inner.lock().expect("state lock poisoned").current_session_id = Some(ws_id);
            self.coordinator
                .inject_system_report(&command, Value::Object(context.metadata));
            return Ok(());
        }

        let ws_id = self
            .sessions
            .create_workflow_session(
                &gs_id,
                WsTaskType::WorkflowAutomation,
                json!({"command": command, "initial_data": Value::Object(context.metadata.clone())}),
            )
            .map_err(|e| e.to_string())?;
        info!(session_id = %ws_id, "work state created WS");
        self.inner.lock().expect("state lock poisoned").current_session_id = Some(ws_id);
        // The processing layer's tool call drives the workflow runner
        Ok(())
    }

    fn handle_mischief(&self, context: Option<StateChangeContext>) -> Result<(), String> {
        if !self.config.mischief_enabled {
            return Err("mischief is disabled by configuration".to_string());
        }
        let _ = context;
        info!("entering MISCHIEF");
        self.clear_session_ref();
        self.status.suppress_helpfulness("enter_mischief");

        // Planning is asynchronous; actions surface as frontend events
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = self.coordinator.clone();
                handle.spawn(async move {
                    match coordinator.plan_mischief().await {
                        Ok(actions) => {
                            for action in actions {
                                debug!(action_id = %action.action_id, "mischief action planned");
                            }
                        }
                        Err(e) => warn!(error = %e, "mischief planning failed"),
                    }
                });
            }
            Err(_) => warn!("no async runtime, mischief planning skipped"),
        }
        Ok(())
    }

    fn handle_sleep(&self, context: Option<StateChangeContext>) -> Result<(), String> {
        info!("entering SLEEP");
        self.clear_session_ref();

        let unloaded = self.registry.unload_heavy();
        let reason = context
            .and_then(|c| c.metadata.get("trigger_reason").cloned())
            .unwrap_or(json!("manual"));

        let sleep_context = json!({
            "entered_at": Utc::now().to_rfc3339(),
            "reason": reason,
            "unloaded_modules": unloaded,
        });
        if let Some(parent) = self.config.sleep_context_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(
            &self.config.sleep_context_path,
            serde_json::to_string_pretty(&sleep_context).expect("sleep context serializes"),
        ) {
            error!(error = %e, "failed to persist sleep context");
        }

        self.inner.lock().expect("state lock poisoned").sleep_unloaded = unloaded;
        Ok(())
    }

    /// Explicit wake call - the only exit from SLEEP
    ///
    /// `WAKE_READY` is published only once the full module set is
    /// reregistered; the sleep-context file is removed either way.
    pub fn wake(&self, reason: &str) -> bool {
        let unloaded = {
            let inner = self.inner.lock().expect("state lock poisoned");
            if inner.state != UepState::Sleep {
                debug!("wake called outside SLEEP, ignoring");
                return false;
            }
            inner.sleep_unloaded.clone()
        };

        info!(reason, "waking from SLEEP");
        let missing = self.registry.reload(&unloaded);
        let _ = std::fs::remove_file(&self.config.sleep_context_path);

        self.bus.publish(
            SystemEvent::SleepExited,
            json!({"reason": reason}),
            "state_manager",
        );

        if missing.is_empty() {
            self.bus.publish(
                SystemEvent::WakeReady,
                json!({"reason": reason, "modules": self.registry.loaded_names()}),
                "state_manager",
            );
        } else {
            warn!(?missing, "wake incomplete: modules missing, WAKE_READY withheld");
        }

        {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            inner.state = UepState::Idle;
            inner.sleep_unloaded.clear();
        }
        true
    }

    /// Leave MISCHIEF or SLEEP, restoring suppressed values
    pub fn exit_special_state(&self, reason: &str) {
        let state = self.current_state();
        match state {
            UepState::Mischief => {
                self.status.clear_helpfulness_override("leave_mischief");
                // Restore the natural value to its resting level
                let current = self.status.snapshot().helpfulness;
                let delta = 0.8 - current;
                if delta.abs() > 1e-6 {
                    self.status.update_helpfulness(delta, "restore_after_mischief");
                }
                info!(reason, "exiting MISCHIEF");
                self.set_state(UepState::Idle, None);
            }
            UepState::Sleep => {
                self.wake(reason);
            }
            _ => debug!(state = %state, "exit_special_state outside a special state"),
        }
    }

    /// Detect a leftover sleep context from a previous run
    pub fn detect_resumed_sleep(&self) -> bool {
        let Ok(content) = std::fs::read_to_string(&self.config.sleep_context_path) else {
            return false;
        };
        let unloaded: Vec<String> = serde_json::from_str::<Value>(&content)
            .ok()
            .and_then(|v| serde_json::from_value(v["unloaded_modules"].clone()).ok())
            .unwrap_or_default();

        info!("sleep context found on startup, resuming SLEEP");
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.state = UepState::Sleep;
        inner.sleep_unloaded = unloaded;
        true
    }

    // === Wiring ===

    /// Register the CHAT/WORK handlers on the state queue
    pub fn register_queue_handlers(self: &Arc<Self>) {
        let manager = self.clone();
        self.queue.register_state_handler(UepState::Chat, move |item| {
            manager.set_state(UepState::Chat, Some(StateChangeContext::from_item(item)));
        });

        let manager = self.clone();
        self.queue.register_state_handler(UepState::Work, move |item| {
            manager.set_state(UepState::Work, Some(StateChangeContext::from_item(item)));
        });

        // CHAT completion sweeps up a CS the cycle did not end itself
        let manager = self.clone();
        self.queue
            .register_completion_handler(UepState::Chat, move |_, _success| {
                if let Some(cs) = manager.sessions.current_chatting() {
                    debug!(session_id = %cs.session_id, "chat completion closing live CS");
                    let _ = manager.sessions.end_chatting_session(&cs.session_id, true);
                }
            });
    }

    /// Subscribe to session endings and queue idle transitions
    pub fn subscribe_events(self: &Arc<Self>) {
        let manager = self.clone();
        self.bus
            .subscribe(SystemEvent::SessionEnded, "state_manager", move |event| {
                manager.on_session_ended(event);
            });

        let manager = self.clone();
        self.bus
            .subscribe(SystemEvent::StateChanged, "state_manager_idle", move |event| {
                // The queue's empty-queue transition; observe, don't re-enter
                if event.source == "state_queue" && event.str_field("new_state") == Some("idle") {
                    let mut inner = manager.inner.lock().expect("state lock poisoned");
                    inner.state = UepState::Idle;
                    inner.current_session_id = None;
                }
            });

        let manager = self.clone();
        self.status
            .register_update_callback("state_manager", move |field, old, new, reason| {
                manager.on_status_update(field, old, new, reason);
            });
    }

    fn on_session_ended(&self, event: &Event) {
        let Some(session_id) = event.str_field("session_id") else {
            return;
        };
        let session_type = event.str_field("session_type").unwrap_or("unknown");
        let reason = event.str_field("reason").unwrap_or("session_completed");
        debug!(session_id, session_type, reason, "session ended");

        // GS endings bubble through the record store only
        let ended_kind = match session_type {
            t if t == SessionKind::Chatting.as_str() => UepState::Chat,
            t if t == SessionKind::Workflow.as_str() => UepState::Work,
            _ => return,
        };

        // Only the session serving the executing state completes it; a
        // background WS ending must not complete a CHAT state
        let current_matches = self
            .queue
            .current_item()
            .map(|item| item.state == ended_kind)
            .unwrap_or(false);
        if !current_matches {
            debug!(session_id, "ended session does not serve the executing state");
            return;
        }

        {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            if inner.current_session_id.as_deref() == Some(session_id) {
                inner.current_session_id = None;
            }
        }

        let success = reason != "error" && reason != "failed";
        let completion_cycle = self.context.cycle_index();
        self.queue.complete_current_state(
            success,
            Some(json!({
                "session_id": session_id,
                "session_type": session_type,
                "end_reason": reason,
            })),
            Some(completion_cycle),
        );
    }

    fn on_status_update(&self, field: &str, _old: f64, _new: f64, reason: &str) {
        debug!(field, reason, "status update observed");

        // Debounce to avoid oscillating in and out of special states
        {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            if matches!(inner.state, UepState::Mischief | UepState::Sleep) {
                return;
            }
            let now = Instant::now();
            if let Some(last) = inner.last_condition_check {
                if now.duration_since(last) < self.config.condition_debounce {
                    return;
                }
            }
            inner.last_condition_check = Some(now);
        }
        self.check_special_state_conditions();
    }

    /// Check whether conditions exist for a special-state entry
    pub fn check_special_state_conditions(&self) -> bool {
        let status = self.status.snapshot();
        let state = self.current_state();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let inactivity = now - status.last_interaction_time;

        if status.boredom >= self.config.sleep_boredom_threshold
            && inactivity > self.config.sleep_inactivity_secs
            && state == UepState::Idle
        {
            info!(boredom = status.boredom, inactivity, "sleep conditions met");
            let mut metadata = Map::new();
            metadata.insert("trigger_reason".to_string(), json!("high_boredom_and_inactivity"));
            return self.set_state(
                UepState::Sleep,
                Some(StateChangeContext {
                    metadata,
                    ..Default::default()
                }),
            );
        }

        if self.config.mischief_enabled && matches!(state, UepState::Idle | UepState::Chat) {
            let conditions = [
                status.boredom >= 0.6 && status.mood <= -0.3,
                status.pride.abs() >= 0.7 && status.boredom >= 0.4,
                status.helpfulness <= 0.3 && status.mood <= -0.2,
            ];
            if conditions.iter().any(|c| *c) {
                info!(
                    mood = status.mood,
                    pride = status.pride,
                    boredom = status.boredom,
                    "mischief conditions met"
                );
                return self.set_state(UepState::Mischief, Some(StateChangeContext::default()));
            }
        }
        false
    }
}
