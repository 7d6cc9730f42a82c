//! Event types - the vocabulary of UEP's lifecycle activity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed enum of system events published on the main bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemEvent {
    StateAdvanced,
    StateChanged,
    SessionStarted,
    SessionEnded,
    CycleCompleted,
    InputLayerComplete,
    ProcessingLayerComplete,
    OutputLayerComplete,
    LlmResponseGenerated,
    MemoryCreated,
    TtsOutputGenerated,
    WorkflowStepCompleted,
    WorkflowFailed,
    SleepExited,
    WakeReady,
}

impl SystemEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEvent::StateAdvanced => "STATE_ADVANCED",
            SystemEvent::StateChanged => "STATE_CHANGED",
            SystemEvent::SessionStarted => "SESSION_STARTED",
            SystemEvent::SessionEnded => "SESSION_ENDED",
            SystemEvent::CycleCompleted => "CYCLE_COMPLETED",
            SystemEvent::InputLayerComplete => "INPUT_LAYER_COMPLETE",
            SystemEvent::ProcessingLayerComplete => "PROCESSING_LAYER_COMPLETE",
            SystemEvent::OutputLayerComplete => "OUTPUT_LAYER_COMPLETE",
            SystemEvent::LlmResponseGenerated => "LLM_RESPONSE_GENERATED",
            SystemEvent::MemoryCreated => "MEMORY_CREATED",
            SystemEvent::TtsOutputGenerated => "TTS_OUTPUT_GENERATED",
            SystemEvent::WorkflowStepCompleted => "WORKFLOW_STEP_COMPLETED",
            SystemEvent::WorkflowFailed => "WORKFLOW_FAILED",
            SystemEvent::SleepExited => "SLEEP_EXITED",
            SystemEvent::WakeReady => "WAKE_READY",
        }
    }
}

impl std::fmt::Display for SystemEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event: type tag, free-form payload, source, timestamp
///
/// Payloads stay duck-typed (`serde_json::Value`) for flexibility; the
/// accessors below constrain reads at the boundary and fail closed on shape
/// mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: SystemEvent,
    pub data: Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: SystemEvent, data: Value, source: impl Into<String>) -> Self {
        Self {
            event_type,
            data,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    pub fn value_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
