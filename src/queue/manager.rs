//! StateQueue - priority-ordered ring of pending states
//!
//! Items sort by priority descending with FIFO ties. The queue owns the
//! single "currently executing" slot; promotion happens when the System Loop
//! calls `check_and_advance_state` at the start of a tick (or inline when an
//! item lands on an idle queue). Completing a state never auto-promotes.
//!
//! The queue is persisted to `memory/state_queue.json` after every mutation
//! so that `current_state`, `current_item`, and the pending list survive
//! restart. Save failures are logged and retried on the next mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

use crate::context::WorkingContext;
use crate::domain::{IntentSegment, UepState, WorkMode};
use crate::events::{EventBus, SystemEvent};

use super::item::{StateQueueItem, StateRequest};

/// Priority of a WORK item inserted by the chat-interrupt path
pub const CHAT_INTERRUPT_PRIORITY: i32 = 200;

type StateHandler = Arc<dyn Fn(&StateQueueItem) + Send + Sync>;
type CompletionHandler = Arc<dyn Fn(&StateQueueItem, bool) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedQueue {
    current_state: UepState,
    current_item: Option<StateQueueItem>,
    queue: Vec<StateQueueItem>,
    saved_at: DateTime<Utc>,
}

struct QueueInner {
    queue: Vec<StateQueueItem>,
    current_state: UepState,
    current_item: Option<StateQueueItem>,
    last_completion_cycle: Option<u64>,
}

/// Snapshot of the queue for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub current_state: UepState,
    pub current_item: Option<StateQueueItem>,
    pub queue_length: usize,
    pub pending_states: Vec<UepState>,
}

pub struct StateQueue {
    storage_path: PathBuf,
    bus: Arc<EventBus>,
    context: Arc<WorkingContext>,
    inner: Mutex<QueueInner>,
    state_handlers: RwLock<HashMap<UepState, StateHandler>>,
    completion_handlers: RwLock<HashMap<UepState, CompletionHandler>>,
}

impl StateQueue {
    /// Open the queue, restoring any persisted state from `storage_path`
    pub fn open(storage_path: impl AsRef<Path>, bus: Arc<EventBus>, context: Arc<WorkingContext>) -> Self {
        let storage_path = storage_path.as_ref().to_path_buf();
        let inner = match Self::load(&storage_path) {
            Some(persisted) => {
                info!(
                    path = %storage_path.display(),
                    pending = persisted.queue.len(),
                    current_state = %persisted.current_state,
                    "state queue restored"
                );
                // Without an executing item the only consistent state is IDLE
                let current_state = if persisted.current_item.is_some() {
                    persisted.current_state
                } else {
                    UepState::Idle
                };
                QueueInner {
                    queue: persisted.queue,
                    current_state,
                    current_item: persisted.current_item,
                    last_completion_cycle: None,
                }
            }
            None => QueueInner {
                queue: Vec::new(),
                current_state: UepState::Idle,
                current_item: None,
                last_completion_cycle: None,
            },
        };
        Self {
            storage_path,
            bus,
            context,
            inner: Mutex::new(inner),
            state_handlers: RwLock::new(HashMap::new()),
            completion_handlers: RwLock::new(HashMap::new()),
        }
    }

    fn load(path: &Path) -> Option<PersistedQueue> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(persisted) => Some(persisted),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to parse persisted queue");
                None
            }
        }
    }

    fn save(&self, inner: &QueueInner) {
        if let Some(parent) = self.storage_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let persisted = PersistedQueue {
            current_state: inner.current_state,
            current_item: inner.current_item.clone(),
            queue: inner.queue.clone(),
            saved_at: Utc::now(),
        };
        match serde_json::to_string_pretty(&persisted) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.storage_path, json) {
                    error!(path = %self.storage_path.display(), error = %e, "failed to persist queue");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize queue"),
        }
    }

    // === Handler registration ===

    pub fn register_state_handler(&self, state: UepState, handler: impl Fn(&StateQueueItem) + Send + Sync + 'static) {
        self.state_handlers
            .write()
            .expect("handler lock poisoned")
            .insert(state, Arc::new(handler));
    }

    pub fn register_completion_handler(
        &self,
        state: UepState,
        handler: impl Fn(&StateQueueItem, bool) + Send + Sync + 'static,
    ) {
        self.completion_handlers
            .write()
            .expect("handler lock poisoned")
            .insert(state, Arc::new(handler));
    }

    // === Enqueue ===

    /// Enqueue a state per priority rules; returns false for IDLE
    ///
    /// If the queue is idle (no executing item), the new item is promoted
    /// immediately.
    pub fn add_state(&self, request: StateRequest) -> bool {
        if request.state == UepState::Idle {
            debug!("add_state: IDLE can never be enqueued");
            return false;
        }

        let item = request.into_item();
        let should_promote = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let position = inner
                .queue
                .iter()
                .position(|existing| existing.priority < item.priority)
                .unwrap_or(inner.queue.len());
            info!(
                state = %item.state,
                priority = item.priority,
                position,
                work_mode = ?item.work_mode,
                "state enqueued"
            );
            inner.queue.insert(position, item);
            self.save(&inner);
            inner.current_state == UepState::Idle && inner.current_item.is_none()
        };

        if should_promote {
            debug!("add_state: queue was idle, promoting immediately");
            self.start_next_state();
        }
        true
    }

    /// Insert a WORK item at the head of the queue (priority 200)
    ///
    /// The only mutation that bypasses priority-sort insertion; used when an
    /// explicit command is detected mid-chat.
    pub fn interrupt_chat_for_work(
        &self,
        command_text: &str,
        trigger_user: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> bool {
        let mut interrupt_metadata = metadata.unwrap_or_default();
        interrupt_metadata.insert("chat_interrupt".to_string(), json!(true));
        interrupt_metadata.insert("interrupt_timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        interrupt_metadata.insert("original_command".to_string(), json!(command_text));

        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(current) = &inner.current_item {
            if current.state == UepState::Chat {
                interrupt_metadata.insert("interrupted_chat_session".to_string(), json!(true));
            }
        }

        let item = StateRequest::new(UepState::Work, command_text)
            .context(command_text)
            .metadata(interrupt_metadata)
            .priority(CHAT_INTERRUPT_PRIORITY)
            .into_item();
        let item = match trigger_user {
            Some(user) => StateQueueItem {
                trigger_user: Some(user.to_string()),
                ..item
            },
            None => item,
        };

        info!(priority = CHAT_INTERRUPT_PRIORITY, "chat interrupted for work");
        inner.queue.insert(0, item);
        self.save(&inner);
        true
    }

    /// Enqueue states for a list of intent segments
    ///
    /// CALL and UNKNOWN segments are dropped; RESPONSE segments become direct
    /// WORK. Degradation markers from the validator are preserved in the
    /// state's metadata. Returns the states added, in order.
    pub fn process_nlp_intents(&self, segments: &[IntentSegment]) -> Vec<UepState> {
        let mut added = Vec::new();
        debug!(count = segments.len(), "process_nlp_intents");

        for (index, segment) in segments.iter().enumerate() {
            let Some(target_state) = segment.target_state() else {
                debug!(
                    index,
                    intent = segment.intent_type.as_str(),
                    "segment dropped (not schedulable)"
                );
                continue;
            };

            let work_mode = match segment.intent_type {
                crate::domain::IntentType::Response => Some(WorkMode::Direct),
                crate::domain::IntentType::Work => segment.work_mode().or(Some(WorkMode::Direct)),
                _ => None,
            };

            let mut metadata = Map::new();
            metadata.insert("intent_type".to_string(), json!(segment.intent_type.as_str()));
            metadata.insert("confidence".to_string(), json!(segment.confidence));
            metadata.insert("segment_index".to_string(), json!(index));
            for key in [
                "degraded_from_work",
                "original_intent",
                "degradation_reason",
                "matched_workflow",
                "potential_workflow",
                "workflow_type",
            ] {
                if let Some(value) = segment.metadata.get(key) {
                    metadata.insert(key.to_string(), value.clone());
                }
            }

            let mut request = StateRequest::new(
                target_state,
                format!("intent segment {}: {}", index + 1, segment.segment_text),
            )
            .context(segment.segment_text.clone())
            .metadata(metadata)
            .priority(segment.priority);
            if let Some(mode) = work_mode {
                request = request.work_mode(mode);
            }

            if self.add_state(request) {
                added.push(target_state);
            }
        }

        debug!(added = added.len(), "process_nlp_intents: states enqueued");
        added
    }

    // === Advancement ===

    /// Invoked by the System Loop at the start of every tick
    ///
    /// Promotes the highest-priority pending item if nothing is executing.
    /// With an empty queue and a non-IDLE current state, transitions to IDLE
    /// (publishing `STATE_CHANGED`; the state manager observes that event
    /// rather than being re-entered here).
    pub fn check_and_advance_state(&self) -> bool {
        {
            let inner = self.inner.lock().expect("queue lock poisoned");
            if inner.current_item.is_some() {
                return false;
            }
            if inner.queue.is_empty() {
                if inner.current_state != UepState::Idle {
                    drop(inner);
                    self.transition_to_idle();
                }
                return false;
            }
        }
        self.start_next_state()
    }

    fn start_next_state(&self) -> bool {
        let (old_state, item, cycle_index) = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.current_item.is_some() || inner.queue.is_empty() {
                return false;
            }
            let mut item = inner.queue.remove(0);
            item.started_at = Some(Utc::now());
            let old_state = inner.current_state;
            inner.current_state = item.state;
            inner.current_item = Some(item.clone());
            self.save(&inner);
            (old_state, item, self.context.cycle_index())
        };

        info!(old_state = %old_state, new_state = %item.state, "state advanced");
        self.bus.publish(
            SystemEvent::StateAdvanced,
            json!({
                "old_state": old_state.as_str(),
                "new_state": item.state.as_str(),
                "content": item.context_content,
                "trigger": item.trigger_content,
                "metadata": Value::Object(item.metadata.clone()),
                "cycle_index": cycle_index,
            }),
            "state_queue",
        );

        let handler = self
            .state_handlers
            .read()
            .expect("handler lock poisoned")
            .get(&item.state)
            .cloned();
        match handler {
            Some(handler) => handler(&item),
            None => debug!(state = %item.state, "no state handler registered"),
        }
        true
    }

    /// Mark the current item completed; never auto-promotes
    ///
    /// Promotion is always the Loop's responsibility at the next tick.
    pub fn complete_current_state(&self, success: bool, result_data: Option<Value>, completion_cycle: Option<u64>) {
        let item = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let Some(mut item) = inner.current_item.take() else {
                debug!("complete_current_state: nothing executing");
                return;
            };
            item.completed_at = Some(Utc::now());
            if let Some(Value::Object(extra)) = result_data {
                for (key, value) in extra {
                    item.metadata.insert(key, value);
                }
            }
            inner.last_completion_cycle = Some(completion_cycle.unwrap_or_else(|| self.context.cycle_index()));
            // current_state keeps its value until the Loop advances
            self.save(&inner);
            item
        };

        info!(state = %item.state, success, "state completed");
        let handler = self
            .completion_handlers
            .read()
            .expect("handler lock poisoned")
            .get(&item.state)
            .cloned();
        if let Some(handler) = handler {
            handler(&item, success);
        }
    }

    fn transition_to_idle(&self) {
        let old_state = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.current_state == UepState::Idle {
                return;
            }
            let old_state = inner.current_state;
            inner.current_state = UepState::Idle;
            inner.current_item = None;
            self.save(&inner);
            old_state
        };

        info!(old_state = %old_state, "queue empty, transitioning to IDLE");
        self.bus.publish(
            SystemEvent::StateChanged,
            json!({
                "old_state": old_state.as_str(),
                "new_state": UepState::Idle.as_str(),
            }),
            "state_queue",
        );
    }

    // === Inspection ===

    pub fn current_state(&self) -> UepState {
        self.inner.lock().expect("queue lock poisoned").current_state
    }

    pub fn current_item(&self) -> Option<StateQueueItem> {
        self.inner.lock().expect("queue lock poisoned").current_item.clone()
    }

    pub fn last_completion_cycle(&self) -> Option<u64> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .last_completion_cycle
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().expect("queue lock poisoned");
        QueueStatus {
            current_state: inner.current_state,
            current_item: inner.current_item.clone(),
            queue_length: inner.queue.len(),
            pending_states: inner.queue.iter().map(|i| i.state).collect(),
        }
    }

    pub fn pending_items(&self) -> Vec<StateQueueItem> {
        self.inner.lock().expect("queue lock poisoned").queue.clone()
    }

    /// Drop every pending item and reset to IDLE
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.queue.clear();
        inner.current_state = UepState::Idle;
        inner.current_item = None;
        self.save(&inner);
        info!("state queue cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_bus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn queue() -> (Arc<StateQueue>, Arc<EventBus>, Arc<WorkingContext>, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let bus = create_event_bus();
        let context = Arc::new(WorkingContext::new());
        let queue = Arc::new(StateQueue::open(
            temp.path().join("state_queue.json"),
            bus.clone(),
            context.clone(),
        ));
        (queue, bus, context, temp)
    }

    #[test]
    fn test_idle_never_enqueued() {
        let (queue, _bus, _ctx, _temp) = queue();
        assert!(!queue.add_state(StateRequest::new(UepState::Idle, "ambient")));
        assert_eq!(queue.status().queue_length, 0);
    }

    #[test]
    fn test_add_promotes_when_idle() {
        let (queue, _bus, _ctx, _temp) = queue();
        queue.add_state(StateRequest::new(UepState::Chat, "hello"));
        // The idle queue promotes inline
        assert_eq!(queue.current_state(), UepState::Chat);
        assert!(queue.current_item().is_some());
        assert_eq!(queue.status().queue_length, 0);
    }

    #[test]
    fn test_priority_order_with_fifo_ties() {
        let (queue, _bus, _ctx, _temp) = queue();
        // Occupy the executing slot so later adds stay queued
        queue.add_state(StateRequest::new(UepState::Chat, "first"));

        queue.add_state(StateRequest::new(UepState::Chat, "chat-a"));
        queue.add_state(StateRequest::new(UepState::Work, "work"));
        queue.add_state(StateRequest::new(UepState::Chat, "chat-b"));

        let pending = queue.pending_items();
        assert_eq!(pending[0].trigger_content, "work");
        // Priority ties preserve insertion order
        assert_eq!(pending[1].trigger_content, "chat-a");
        assert_eq!(pending[2].trigger_content, "chat-b");
    }

    #[test]
    fn test_complete_does_not_auto_promote() {
        let (queue, _bus, _ctx, _temp) = queue();
        queue.add_state(StateRequest::new(UepState::Chat, "one"));
        queue.add_state(StateRequest::new(UepState::Chat, "two"));

        queue.complete_current_state(true, None, Some(3));
        // Still no executing item until the loop advances
        assert!(queue.current_item().is_none());
        assert_eq!(queue.last_completion_cycle(), Some(3));
        assert_eq!(queue.status().queue_length, 1);

        assert!(queue.check_and_advance_state());
        assert_eq!(queue.current_item().unwrap().trigger_content, "two");
    }

    #[test]
    fn test_empty_queue_round_trips_to_idle() {
        let (queue, _bus, _ctx, temp) = queue();
        queue.add_state(StateRequest::new(UepState::Chat, "only"));
        queue.complete_current_state(true, None, None);
        assert!(!queue.check_and_advance_state());
        assert_eq!(queue.current_state(), UepState::Idle);

        // The persisted file reflects the idle, empty queue
        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(temp.path().join("state_queue.json")).unwrap()).unwrap();
        assert_eq!(raw["current_state"], json!("idle"));
        assert_eq!(raw["queue"].as_array().unwrap().len(), 0);
        assert!(raw["current_item"].is_null());
    }

    #[test]
    fn test_state_advanced_carries_cycle_index() {
        let (queue, bus, ctx, _temp) = queue();
        ctx.set_cycle_index(41);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(SystemEvent::StateAdvanced, "recorder", move |event| {
            seen_clone.lock().unwrap().push((
                event.str_field("new_state").unwrap().to_string(),
                event.u64_field("cycle_index").unwrap(),
            ));
        });

        queue.add_state(StateRequest::new(UepState::Work, "task").context("do the task"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), [("work".to_string(), 41)]);
    }

    #[test]
    fn test_interrupt_inserts_at_head() {
        let (queue, _bus, _ctx, _temp) = queue();
        queue.add_state(StateRequest::new(UepState::Chat, "chatting"));
        queue.add_state(StateRequest::new(UepState::Work, "queued work"));

        queue.interrupt_chat_for_work("check the weather", Some("user_1"), None);

        let pending = queue.pending_items();
        assert_eq!(pending[0].priority, CHAT_INTERRUPT_PRIORITY);
        assert_eq!(pending[0].trigger_content, "check the weather");
        assert!(pending[0].meta_bool("chat_interrupt"));
        assert!(pending[0].meta_bool("interrupted_chat_session"));
        assert_eq!(pending[0].trigger_user.as_deref(), Some("user_1"));
    }

    #[test]
    fn test_process_nlp_intents_drops_call_and_unknown() {
        use crate::domain::IntentType;
        let (queue, _bus, _ctx, _temp) = queue();
        // Occupy the slot so everything stays pending
        queue.add_state(StateRequest::new(UepState::Chat, "busy"));

        let segments = vec![
            IntentSegment::new("hello", IntentType::Call, 0.9),
            IntentSegment::new("check the weather", IntentType::Work, 0.9),
            IntentSegment::new("hmm", IntentType::Unknown, 0.2),
            IntentSegment::new("option two please", IntentType::Response, 0.95),
            IntentSegment::new("tell me a story", IntentType::Chat, 0.85),
        ];
        let added = queue.process_nlp_intents(&segments);
        assert_eq!(added, vec![UepState::Work, UepState::Work, UepState::Chat]);

        let pending = queue.pending_items();
        assert_eq!(pending.len(), 3);
        // RESPONSE segments become direct WORK
        let response_item = pending
            .iter()
            .find(|i| i.context_content == "option two please")
            .unwrap();
        assert_eq!(response_item.work_mode, Some(WorkMode::Direct));
        assert_eq!(response_item.priority, 100);
    }

    #[test]
    fn test_process_nlp_intents_preserves_degradation_markers() {
        use crate::domain::IntentType;
        let (queue, _bus, _ctx, _temp) = queue();
        queue.add_state(StateRequest::new(UepState::Chat, "busy"));

        let mut segment = IntentSegment::new("do the thing", IntentType::Chat, 0.6);
        segment.set_meta("degraded_from_work", json!(true));
        segment.set_meta("original_intent", json!("work"));
        segment.set_meta("degradation_reason", json!("no_matching_workflow"));
        queue.process_nlp_intents(&[segment]);

        let pending = queue.pending_items();
        let item = pending.last().unwrap();
        assert!(item.meta_bool("degraded_from_work"));
        assert_eq!(item.meta_str("original_intent"), Some("work"));
        assert_eq!(item.meta_str("degradation_reason"), Some("no_matching_workflow"));
    }

    #[test]
    fn test_persistence_survives_restart() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state_queue.json");
        let bus = create_event_bus();
        let context = Arc::new(WorkingContext::new());
        {
            let queue = StateQueue::open(&path, bus.clone(), context.clone());
            queue.add_state(StateRequest::new(UepState::Work, "survives"));
            queue.add_state(StateRequest::new(UepState::Chat, "pending"));
        }

        let reopened = StateQueue::open(&path, bus, context);
        // The executing WORK item and the pending CHAT item both survive
        assert_eq!(reopened.current_state(), UepState::Work);
        assert_eq!(reopened.current_item().unwrap().trigger_content, "survives");
        assert_eq!(reopened.status().queue_length, 1);
    }

    #[test]
    fn test_restart_without_current_item_forces_idle() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state_queue.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "current_state": "chat",
                "current_item": null,
                "queue": [],
                "saved_at": Utc::now().to_rfc3339(),
            }))
            .unwrap(),
        )
        .unwrap();

        let queue = StateQueue::open(&path, create_event_bus(), Arc::new(WorkingContext::new()));
        assert_eq!(queue.current_state(), UepState::Idle);
    }

    #[test]
    fn test_state_handler_invoked_on_promotion() {
        let (queue, _bus, _ctx, _temp) = queue();
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        queue.register_state_handler(UepState::Work, move |item| {
            assert_eq!(item.context_content, "run it");
            invoked_clone.fetch_add(1, Ordering::SeqCst);
        });

        queue.add_state(StateRequest::new(UepState::Work, "run it"));
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_handler_receives_success_flag() {
        let (queue, _bus, _ctx, _temp) = queue();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let outcomes_clone = outcomes.clone();
        queue.register_completion_handler(UepState::Chat, move |_, success| {
            outcomes_clone.lock().unwrap().push(success);
        });

        queue.add_state(StateRequest::new(UepState::Chat, "talk"));
        queue.complete_current_state(false, Some(json!({"error": "llm failed"})), None);
        assert_eq!(outcomes.lock().unwrap().as_slice(), [false]);
    }
}
