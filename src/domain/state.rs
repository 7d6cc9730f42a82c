//! System states and work modes

use serde::{Deserialize, Serialize};

/// The system-level state the orchestrator is in
///
/// `Idle` is the ambient state when the queue is empty; it can never be
/// enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UepState {
    Idle,
    Chat,
    Work,
    Mischief,
    Sleep,
    Error,
}

impl UepState {
    /// Default scheduling priority for this state (higher runs first)
    pub fn default_priority(&self) -> i32 {
        match self {
            UepState::Work => 100,
            UepState::Chat => 50,
            UepState::Mischief => 30,
            UepState::Sleep => 10,
            UepState::Error => 5,
            UepState::Idle => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UepState::Idle => "idle",
            UepState::Chat => "chat",
            UepState::Work => "work",
            UepState::Mischief => "mischief",
            UepState::Sleep => "sleep",
            UepState::Error => "error",
        }
    }
}

impl std::fmt::Display for UepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a WORK item should be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkMode {
    /// High priority, should run immediately
    Direct,
    /// Low priority, can be deferred
    Background,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::Direct => "direct",
            WorkMode::Background => "background",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(UepState::Work.default_priority() > UepState::Chat.default_priority());
        assert!(UepState::Chat.default_priority() > UepState::Mischief.default_priority());
        assert!(UepState::Mischief.default_priority() > UepState::Sleep.default_priority());
        assert!(UepState::Sleep.default_priority() > UepState::Error.default_priority());
        assert_eq!(UepState::Idle.default_priority(), 0);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let json = serde_json::to_string(&UepState::Mischief).unwrap();
        assert_eq!(json, "\"mischief\"");
        let back: UepState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UepState::Mischief);
    }

    #[test]
    fn test_work_mode_serde() {
        assert_eq!(serde_json::to_string(&WorkMode::Direct).unwrap(), "\"direct\"");
        assert_eq!(serde_json::to_string(&WorkMode::Background).unwrap(), "\"background\"");
    }
}
