//! End-to-end scenarios driving a full core through real ticks
//!
//! Capability modules are scripted fakes: speech input pops from a queue,
//! TTS records chunks, and the reasoner echoes or issues workflow calls
//! depending on the mode it is invoked in.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use uep::{
    CapturedSpeech, Config, Core, Event, FunctionCall, MemoryStore, ModuleError, ReasonError, ReasonMode,
    ReasonOutcome, ReasonRequest, Reasoner, SpeechInput, SpeechOutput, SystemEvent, ToolPath, UepState,
};

const ALL_EVENTS: [SystemEvent; 15] = [
    SystemEvent::StateAdvanced,
    SystemEvent::StateChanged,
    SystemEvent::SessionStarted,
    SystemEvent::SessionEnded,
    SystemEvent::CycleCompleted,
    SystemEvent::InputLayerComplete,
    SystemEvent::ProcessingLayerComplete,
    SystemEvent::OutputLayerComplete,
    SystemEvent::LlmResponseGenerated,
    SystemEvent::MemoryCreated,
    SystemEvent::TtsOutputGenerated,
    SystemEvent::WorkflowStepCompleted,
    SystemEvent::WorkflowFailed,
    SystemEvent::SleepExited,
    SystemEvent::WakeReady,
];

struct ScriptedStt {
    utterances: Mutex<VecDeque<CapturedSpeech>>,
}

impl ScriptedStt {
    fn new(utterances: Vec<(&str, &str)>) -> Arc<Self> {
        Arc::new(Self {
            utterances: Mutex::new(
                utterances
                    .into_iter()
                    .map(|(text, speaker)| CapturedSpeech {
                        text: text.to_string(),
                        speaker_id: Some(speaker.to_string()),
                    })
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl SpeechInput for ScriptedStt {
    async fn capture(&self) -> Result<Option<CapturedSpeech>, ModuleError> {
        Ok(self.utterances.lock().unwrap().pop_front())
    }
}

struct RecordingTts {
    chunks: Mutex<Vec<String>>,
}

impl RecordingTts {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            chunks: Mutex::new(Vec::new()),
        })
    }

    fn spoken(&self) -> Vec<String> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechOutput for RecordingTts {
    async fn synthesize(&self, chunk: &str) -> Result<(), ModuleError> {
        self.chunks.lock().unwrap().push(chunk.to_string());
        Ok(())
    }
}

/// Echoes chat prompts back; drives workflows with `start_workflow`
struct ScriptedReasoner {
    end_chat_session: bool,
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, request: ReasonRequest) -> Result<ReasonOutcome, ReasonError> {
        match request.mode {
            ReasonMode::Chat => {
                let mut response = json!({"text": request.prompt, "confidence": 0.9});
                if self.end_chat_session {
                    response["session_control"] = json!({
                        "should_end_session": true,
                        "end_reason": "completed",
                        "confidence": 0.9,
                    });
                }
                Ok(ReasonOutcome::Structured(response))
            }
            ReasonMode::Work => Ok(ReasonOutcome::FunctionCall(FunctionCall {
                name: "start_workflow".to_string(),
                args: json!({"workflow_name": "get_weather", "command": request.prompt}),
            })),
            ReasonMode::Internal => Ok(ReasonOutcome::Structured(
                json!({"text": request.prompt, "confidence": 1.0}),
            )),
            ReasonMode::Direct => Ok(ReasonOutcome::Structured(json!({"text": request.prompt}))),
            ReasonMode::Mischief => Ok(ReasonOutcome::Structured(json!({"actions": []}))),
        }
    }
}

struct Harness {
    core: Core,
    tts: Arc<RecordingTts>,
    events: Arc<Mutex<Vec<Event>>>,
    _temp: TempDir,
}

impl Harness {
    fn new(utterances: Vec<(&str, &str)>, end_chat_session: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.memory_dir = uep::config::MemoryDir(temp.path().join("memory"));
        let core = Core::new(config).unwrap();

        core.registry.register_stt(ScriptedStt::new(utterances));
        let tts = RecordingTts::new();
        core.registry.register_tts(tts.clone());
        core.registry
            .register_reasoner(Arc::new(ScriptedReasoner { end_chat_session }));

        let events = Arc::new(Mutex::new(Vec::new()));
        for event_type in ALL_EVENTS {
            let sink = events.clone();
            core.bus
                .subscribe(event_type, format!("recorder_{event_type}"), move |event| {
                    sink.lock().unwrap().push(event.clone());
                });
        }

        Self {
            core,
            tts,
            events,
            _temp: temp,
        }
    }

    async fn run_ticks(&self, count: usize) {
        for _ in 0..count {
            self.core.system_loop.tick().await;
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn event_index<F: Fn(&Event) -> bool>(&self, predicate: F) -> Option<usize> {
        self.events().iter().position(|e| predicate(e))
    }

    fn count(&self, event_type: SystemEvent) -> usize {
        self.events().iter().filter(|e| e.event_type == event_type).count()
    }
}

#[tokio::test]
async fn test_simple_chat_cycle() {
    let harness = Harness::new(
        vec![("Hello! Can you tell me what time it is?", "debug")],
        true,
    );
    harness.run_ticks(4).await;

    // The layer sequence of the chat cycle, in order
    let input = harness
        .event_index(|e| e.event_type == SystemEvent::InputLayerComplete)
        .expect("input layer completed");
    let processing = harness
        .event_index(|e| e.event_type == SystemEvent::ProcessingLayerComplete)
        .expect("processing layer completed");
    let output = harness
        .event_index(|e| e.event_type == SystemEvent::OutputLayerComplete)
        .expect("output layer completed");
    let cycle = harness
        .event_index(|e| e.event_type == SystemEvent::CycleCompleted)
        .expect("cycle completed");
    assert!(input < processing && processing < output && output < cycle);

    // Exactly one snapshot, under the debug identity's token
    assert_eq!(harness.count(SystemEvent::MemoryCreated), 1);
    let debug_token = harness.core.identities.debug_identity().memory_token;
    let memory_event = harness.events();
    let memory_event = memory_event
        .iter()
        .find(|e| e.event_type == SystemEvent::MemoryCreated)
        .unwrap();
    assert_eq!(memory_event.str_field("memory_token"), Some(debug_token.as_str()));

    // The response was spoken
    assert!(!harness.tts.spoken().is_empty());
    // The system wound down to IDLE
    assert_eq!(harness.core.queue.current_state(), UepState::Idle);
}

#[tokio::test]
async fn test_identity_isolation() {
    let harness = Harness::new(
        vec![
            ("I love coffee and I enjoy drinking it in the morning.", "bernie"),
            ("I prefer tea and I like to drink it at night.", "debug"),
        ],
        true,
    );
    let bernie = harness.core.identities.ensure_identity("bernie", "Bernie");
    let debug = harness.core.identities.debug_identity();

    harness.run_ticks(6).await;

    // Exactly one snapshot per token
    let bernie_snapshots = harness.core.memory.all_for_token(&bernie.memory_token);
    let debug_snapshots = harness.core.memory.all_for_token(&debug.memory_token);
    assert_eq!(bernie_snapshots.len(), 1);
    assert_eq!(debug_snapshots.len(), 1);
    assert!(bernie_snapshots[0].text.contains("coffee"));
    assert!(debug_snapshots[0].text.contains("tea"));

    // Retrieval with bernie's token sees only bernie's snapshot
    let retrieved = harness
        .core
        .memory
        .retrieve_snapshots(&bernie.memory_token, "drink", 10);
    assert_eq!(retrieved.len(), 1);
    assert_eq!(retrieved[0].memory_token, bernie.memory_token);
    assert!(retrieved[0].text.contains("coffee"));
}

#[tokio::test]
async fn test_compound_intent_work_then_chat() {
    let harness = Harness::new(
        vec![("Check the weather in Taipei and then let's talk about it", "debug")],
        true,
    );

    // Tick 1 captures, segments, and promotes the WORK state
    harness.run_ticks(1).await;
    let current = harness.core.queue.current_item().expect("work item executing");
    assert_eq!(current.state, UepState::Work);
    assert_eq!(current.priority, 100);
    assert_eq!(current.meta_str("matched_workflow"), Some("get_weather"));
    // The CHAT segment waits behind it
    let pending = harness.core.queue.pending_items();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state, UepState::Chat);
    assert_eq!(pending[0].priority, 50);

    harness.run_ticks(4).await;

    // The workflow ran and its session ended before any CS was created
    let ws_ended = harness
        .event_index(|e| {
            e.event_type == SystemEvent::SessionEnded && e.str_field("session_type") == Some("workflow")
        })
        .expect("workflow session ended");
    let cs_started = harness
        .event_index(|e| {
            e.event_type == SystemEvent::SessionStarted && e.str_field("session_type") == Some("chatting")
        })
        .expect("chat session started");
    assert!(ws_ended < cs_started, "WORK must complete before the CHAT session starts");
    assert_eq!(harness.count(SystemEvent::WorkflowStepCompleted), 1);
}

#[tokio::test]
async fn test_work_interrupt_during_chat() {
    let harness = Harness::new(
        vec![
            ("I would like to chat about my day for a while", "debug"),
            ("Can you tell me about the weather in Taipei?", "debug"),
        ],
        // Keep the chat session alive so the second utterance lands mid-chat
        false,
    );

    // Ticks 1-2: the chat state promotes, the CS is created and stays live
    harness.run_ticks(2).await;
    assert!(harness.core.sessions.current_chatting().is_some());

    // Tick 3: the weather command interrupts the chat
    harness.run_ticks(1).await;
    let pending = harness.core.queue.pending_items();
    assert_eq!(pending[0].priority, 200);
    assert_eq!(pending[0].state, UepState::Work);
    assert!(pending[0].meta_bool("chat_interrupt"));

    harness.run_ticks(3).await;

    let cs_ended = harness
        .event_index(|e| {
            e.event_type == SystemEvent::SessionEnded
                && e.str_field("session_type") == Some("chatting")
                && e.str_field("reason") == Some("work_interrupt")
        })
        .expect("CS ended with work_interrupt");
    let ws_started = harness
        .event_index(|e| {
            e.event_type == SystemEvent::SessionStarted && e.str_field("session_type") == Some("workflow")
        })
        .expect("WS started");
    assert!(cs_ended < ws_started, "CS end must precede WS start");
}

#[tokio::test]
async fn test_session_timeout_completes_state() {
    let harness = Harness::new(
        vec![("Tell me something nice about my garden today", "debug")],
        // No model-signalled end; only the sweeper can end the CS
        false,
    );

    harness.run_ticks(2).await;
    let cs = harness.core.sessions.current_chatting().expect("CS active");

    harness.core.sessions.set_max_session_age(1);
    let sweeper = uep::spawn_timeout_sweeper(harness.core.sessions.clone());
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    sweeper.abort();

    let cs_timed_out = harness.events().into_iter().any(|e| {
        e.event_type == SystemEvent::SessionEnded
            && e.str_field("reason") == Some("timeout")
            && e.str_field("session_id") == Some(cs.session_id.as_str())
    });
    assert!(cs_timed_out, "sweeper must end the CS with reason timeout");

    // The CHAT state completed and no new CS exists
    assert!(harness.core.queue.current_item().is_none());
    assert!(harness.core.sessions.current_chatting().is_none());
}

#[tokio::test]
async fn test_tool_catalogue_partitioning() {
    let harness = Harness::new(vec![], true);
    let catalog = harness.core.coordinator.catalog();

    let chat_names = catalog.tool_names(ToolPath::PathChat);
    let work_names = catalog.tool_names(ToolPath::PathWork);

    for name in [
        "memory_retrieve_snapshots",
        "memory_get_snapshot",
        "memory_search_timeline",
        "memory_update_profile",
        "memory_store_observation",
    ] {
        assert!(chat_names.contains(&name.to_string()));
        assert!(!work_names.contains(&name.to_string()));
    }
    for name in [
        "start_workflow",
        "get_workflow_status",
        "review_step",
        "approve_step",
        "modify_step",
        "cancel_workflow",
        "provide_workflow_input",
    ] {
        assert!(work_names.contains(&name.to_string()));
        assert!(!chat_names.contains(&name.to_string()));
    }
}

#[tokio::test]
async fn test_cycle_indices_strictly_monotonic() {
    let harness = Harness::new(
        vec![
            ("Tell me a fact about rivers in general", "debug"),
            ("Tell me one more fact about mountains", "debug"),
        ],
        true,
    );
    harness.run_ticks(8).await;

    let indices: Vec<u64> = harness
        .events()
        .iter()
        .filter(|e| e.event_type == SystemEvent::CycleCompleted)
        .map(|e| e.u64_field("cycle_index").unwrap())
        .collect();
    assert!(indices.len() >= 2);
    for pair in indices.windows(2) {
        assert!(pair[0] < pair[1], "cycle indices must be strictly monotonic");
    }
}

#[tokio::test]
async fn test_persisted_queue_reflects_empty_idle_state() {
    let harness = Harness::new(vec![("Say hello to everyone in the room please", "debug")], true);
    harness.run_ticks(4).await;

    let path = harness.core.config.state_queue_path();
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(raw["current_state"], json!("idle"));
    assert!(raw["current_item"].is_null());
    assert_eq!(raw["queue"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_sleep_and_wake_roundtrip() {
    let harness = Harness::new(vec![], true);

    // Enter SLEEP directly
    assert!(harness.core.state_manager.set_state(UepState::Sleep, None));
    assert!(harness.core.config.sleep_context_path().exists());
    // Heavy modules are parked
    assert!(harness.core.registry.reasoner().is_none());
    assert!(harness.core.registry.tts().is_none());

    assert!(harness.core.wake("user_called"));
    assert!(!harness.core.config.sleep_context_path().exists());
    assert!(harness.core.registry.reasoner().is_some());

    let sleep_exited = harness
        .event_index(|e| e.event_type == SystemEvent::SleepExited)
        .expect("SLEEP_EXITED published");
    let wake_ready = harness
        .event_index(|e| e.event_type == SystemEvent::WakeReady)
        .expect("WAKE_READY published");
    assert!(sleep_exited < wake_ready);
    assert_eq!(harness.core.state_manager.current_state(), UepState::Idle);
}

#[tokio::test]
async fn test_failed_cycle_recovers_to_idle_with_fallback() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.memory_dir = uep::config::MemoryDir(temp.path().join("memory"));
    let core = Core::new(config).unwrap();

    // STT and TTS are present; the reasoning module is not
    core.registry
        .register_stt(ScriptedStt::new(vec![("Tell me about your morning routine", "debug")]));
    let tts = RecordingTts::new();
    core.registry.register_tts(tts.clone());

    for _ in 0..4 {
        core.system_loop.tick().await;
    }

    // The CS ended with reason error and the queue recovered to IDLE
    assert!(core.sessions.current_chatting().is_none());
    assert!(core.queue.current_item().is_none());
    assert_eq!(core.queue.current_state(), UepState::Idle);

    // No silent failure: the fallback line was spoken
    assert!(
        tts.spoken()
            .iter()
            .any(|chunk| chunk.contains("could not generate a response"))
    );
}

#[tokio::test]
async fn test_response_intent_takes_direct_mode() {
    let harness = Harness::new(vec![], true);

    // A pre-formed workflow reply arrives as a direct WORK state
    let added = harness.core.queue.add_state(
        uep::StateRequest::new(UepState::Work, "workflow reply")
            .context("option two please")
            .meta("intent_type", json!("response")),
    );
    assert!(added);

    harness.run_ticks(2).await;

    // The reply bypassed the tool loop: direct mode, no workflow launch
    let direct = harness.event_index(|e| {
        e.event_type == SystemEvent::ProcessingLayerComplete && e.str_field("mode") == Some("direct")
    });
    assert!(direct.is_some(), "processing must run in direct mode");
    assert_eq!(harness.count(SystemEvent::WorkflowStepCompleted), 0);

    // The pre-formed text was spoken as-is
    assert!(harness.tts.spoken().iter().any(|c| c.contains("option two please")));
}

#[tokio::test]
async fn test_system_report_fast_path() {
    let harness = Harness::new(vec![], true);

    // A background system report arrives as a direct WORK state
    let added = harness.core.queue.add_state(
        uep::StateRequest::new(UepState::Work, "battery low report")
            .context("The battery level dropped below ten percent")
            .meta("workflow_type", json!("system_report")),
    );
    assert!(added);

    harness.run_ticks(3).await;

    // A SYSTEM_NOTIFICATION WS carried the report; no workflow engine ran
    assert_eq!(harness.count(SystemEvent::WorkflowStepCompleted), 0);
    let ws_started = harness.event_index(|e| {
        e.event_type == SystemEvent::SessionStarted && e.str_field("session_type") == Some("workflow")
    });
    assert!(ws_started.is_some());
    // The content reached the processing layer without the input layer
    assert!(
        harness
            .event_index(|e| {
                e.event_type == SystemEvent::InputLayerComplete && e.bool_field("system_report") == Some(true)
            })
            .is_some()
    );
    assert!(harness.count(SystemEvent::ProcessingLayerComplete) >= 1);
}
