//! Per-mode response schemas
//!
//! Each reasoning mode has a strict output schema. Unknown fields are
//! ignored; missing required fields are a hard error (`SchemaError`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::types::ReasonMode;

#[derive(Debug, Error)]
#[error("response does not match the {mode} schema: {detail}")]
pub struct SchemaError {
    pub mode: &'static str,
    pub detail: String,
}

fn parse<T: serde::de::DeserializeOwned>(mode: ReasonMode, value: Value) -> Result<T, SchemaError> {
    serde_json::from_value(value).map_err(|e| SchemaError {
        mode: mode.as_str(),
        detail: e.to_string(),
    })
}

/// Deltas applied to the shared status model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdates {
    #[serde(default)]
    pub mood_delta: f64,
    #[serde(default)]
    pub pride_delta: f64,
    #[serde(default)]
    pub helpfulness_delta: f64,
    #[serde(default)]
    pub boredom_delta: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningSignals {
    #[serde(default)]
    pub formality_signal: Option<f64>,
    #[serde(default)]
    pub detail_signal: Option<f64>,
    #[serde(default)]
    pub technical_signal: Option<f64>,
    #[serde(default)]
    pub interaction_signal: Option<f64>,
}

/// Model-signalled session termination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionControl {
    pub should_end_session: bool,
    #[serde(default)]
    pub end_reason: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub status_updates: Option<StatusUpdates>,
    #[serde(default)]
    pub memory_observation: Option<String>,
    #[serde(default)]
    pub learning_signals: Option<LearningSignals>,
    #[serde(default)]
    pub session_control: Option<SessionControl>,
}

impl ChatResponse {
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        parse(ReasonMode::Chat, value)
    }

    /// Whether the model signalled a session end with enough confidence
    pub fn wants_session_end(&self, min_confidence: f64) -> bool {
        self.session_control
            .as_ref()
            .map(|c| c.should_end_session && c.confidence >= min_confidence)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SysActionKind {
    StartWorkflow,
    ExecuteFunction,
    ProvideOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysAction {
    pub action: SysActionKind,
    pub target: String,
    #[serde(default)]
    pub parameters: Value,
    pub confidence: f64,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResponse {
    pub text: String,
    pub confidence: f64,
    pub sys_action: SysAction,
    #[serde(default)]
    pub status_updates: Option<StatusUpdates>,
    #[serde(default)]
    pub session_control: Option<SessionControl>,
}

impl WorkResponse {
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        parse(ReasonMode::Work, value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectResponse {
    pub text: String,
}

impl DirectResponse {
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        parse(ReasonMode::Direct, value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalResponse {
    pub text: String,
    pub confidence: f64,
}

impl InternalResponse {
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        parse(ReasonMode::Internal, value)
    }
}

/// A tagged autonomous action planned in MISCHIEF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MischiefAction {
    pub action_id: String,
    #[serde(default)]
    pub params: Value,
}

impl MischiefAction {
    /// Minimum mood required to execute this action (from params, default -1)
    pub fn min_mood(&self) -> f64 {
        self.params
            .get("min_mood")
            .and_then(Value::as_f64)
            .unwrap_or(-1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MischiefResponse {
    pub actions: Vec<MischiefAction>,
}

impl MischiefResponse {
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        parse(ReasonMode::Mischief, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_schema_minimal() {
        let response = ChatResponse::parse(json!({
            "text": "It is three in the afternoon.",
            "confidence": 0.92,
        }))
        .unwrap();
        assert_eq!(response.text, "It is three in the afternoon.");
        assert!(response.status_updates.is_none());
        assert!(!response.wants_session_end(0.7));
    }

    #[test]
    fn test_chat_schema_unknown_fields_ignored() {
        let response = ChatResponse::parse(json!({
            "text": "hi",
            "confidence": 0.8,
            "some_future_field": {"nested": true},
        }))
        .unwrap();
        assert_eq!(response.text, "hi");
    }

    #[test]
    fn test_chat_schema_missing_required_is_error() {
        let err = ChatResponse::parse(json!({"confidence": 0.8})).unwrap_err();
        assert_eq!(err.mode, "chat");
    }

    #[test]
    fn test_session_end_confidence_gate() {
        let mut response = ChatResponse::parse(json!({
            "text": "bye",
            "confidence": 0.9,
            "session_control": {
                "should_end_session": true,
                "end_reason": "completed",
                "confidence": 0.69,
            },
        }))
        .unwrap();
        assert!(!response.wants_session_end(0.7));

        response.session_control.as_mut().unwrap().confidence = 0.7;
        // The gate is >=, not >
        assert!(response.wants_session_end(0.7));
    }

    #[test]
    fn test_work_schema() {
        let response = WorkResponse::parse(json!({
            "text": "Starting the weather workflow.",
            "confidence": 0.88,
            "sys_action": {
                "action": "start_workflow",
                "target": "get_weather",
                "parameters": {"location": "Taipei"},
                "confidence": 0.9,
                "requires_confirmation": false,
                "reason": "explicit command",
            },
        }))
        .unwrap();
        assert_eq!(response.sys_action.action, SysActionKind::StartWorkflow);
        assert_eq!(response.sys_action.target, "get_weather");
    }

    #[test]
    fn test_work_schema_requires_sys_action() {
        assert!(WorkResponse::parse(json!({"text": "ok", "confidence": 0.5})).is_err());
    }

    #[test]
    fn test_direct_and_internal_schemas() {
        assert_eq!(DirectResponse::parse(json!({"text": "ok"})).unwrap().text, "ok");
        let internal = InternalResponse::parse(json!({"text": "noted", "confidence": 0.4})).unwrap();
        assert_eq!(internal.confidence, 0.4);
        assert!(InternalResponse::parse(json!({"text": "missing confidence"})).is_err());
    }

    #[test]
    fn test_mischief_schema_and_mood_gate() {
        let response = MischiefResponse::parse(json!({
            "actions": [
                {"action_id": "hide_cursor", "params": {"min_mood": 0.2}},
                {"action_id": "hum_quietly", "params": {}},
            ],
        }))
        .unwrap();
        assert_eq!(response.actions.len(), 2);
        assert_eq!(response.actions[0].min_mood(), 0.2);
        assert_eq!(response.actions[1].min_mood(), -1.0);
    }
}
