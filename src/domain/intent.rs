//! Intent types and segments produced by the input layer

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{UepState, WorkMode};

/// Intent classes emitted by the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    /// Pure greeting / attention call - never enqueued
    Call,
    Chat,
    Work,
    /// A reply feeding a waiting workflow - enqueued as direct WORK
    Response,
    Unknown,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Call => "call",
            IntentType::Chat => "chat",
            IntentType::Work => "work",
            IntentType::Response => "response",
            IntentType::Unknown => "unknown",
        }
    }
}

/// One contiguous span of user text carrying a single intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSegment {
    pub segment_text: String,
    pub intent_type: IntentType,
    /// Classifier confidence in 0..=1
    pub confidence: f64,
    /// Scheduling priority for the state this segment becomes
    pub priority: i32,
    /// Free-form provenance: `work_mode`, `degraded_from_work`,
    /// `matched_workflow`, ...
    #[serde(default)]
    pub metadata: Value,
}

impl IntentSegment {
    pub fn new(text: impl Into<String>, intent_type: IntentType, confidence: f64) -> Self {
        let mut segment = Self {
            segment_text: text.into(),
            intent_type,
            confidence,
            priority: 0,
            metadata: Value::Object(Default::default()),
        };
        segment.priority = segment.derive_priority();
        segment
    }

    /// Work mode recorded in metadata, if any
    pub fn work_mode(&self) -> Option<WorkMode> {
        self.metadata
            .get("work_mode")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// The system state this segment schedules, or None for dropped intents
    pub fn target_state(&self) -> Option<UepState> {
        match self.intent_type {
            IntentType::Work | IntentType::Response => Some(UepState::Work),
            IntentType::Chat => Some(UepState::Chat),
            IntentType::Call | IntentType::Unknown => None,
        }
    }

    /// Priority derived from the target state and work mode
    pub fn derive_priority(&self) -> i32 {
        match self.target_state() {
            Some(state) => {
                let base = state.default_priority();
                match self.work_mode() {
                    Some(WorkMode::Direct) => base.max(100),
                    Some(WorkMode::Background) => base.min(30),
                    None if self.intent_type == IntentType::Response => base.max(100),
                    None => base,
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_state_mapping() {
        assert_eq!(
            IntentSegment::new("do it", IntentType::Work, 0.9).target_state(),
            Some(UepState::Work)
        );
        assert_eq!(
            IntentSegment::new("tell me", IntentType::Chat, 0.9).target_state(),
            Some(UepState::Chat)
        );
        assert_eq!(
            IntentSegment::new("yes", IntentType::Response, 0.9).target_state(),
            Some(UepState::Work)
        );
        assert_eq!(IntentSegment::new("hi", IntentType::Call, 0.9).target_state(), None);
        assert_eq!(IntentSegment::new("uh", IntentType::Unknown, 0.2).target_state(), None);
    }

    #[test]
    fn test_priority_follows_work_mode() {
        let mut seg = IntentSegment::new("archive files", IntentType::Work, 0.9);
        seg.set_meta("work_mode", json!("background"));
        assert_eq!(seg.derive_priority(), 30);

        seg.set_meta("work_mode", json!("direct"));
        assert_eq!(seg.derive_priority(), 100);
    }

    #[test]
    fn test_response_is_direct_priority() {
        let seg = IntentSegment::new("option two", IntentType::Response, 0.95);
        assert_eq!(seg.derive_priority(), 100);
    }

    #[test]
    fn test_metadata_accessors() {
        let mut seg = IntentSegment::new("check weather", IntentType::Work, 0.8);
        seg.set_meta("matched_workflow", json!("get_weather"));
        seg.set_meta("degraded_from_work", json!(true));
        assert_eq!(seg.meta_str("matched_workflow"), Some("get_weather"));
        assert!(seg.meta_bool("degraded_from_work"));
        assert!(!seg.meta_bool("missing"));
    }
}
