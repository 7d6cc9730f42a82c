//! Session kinds, statuses, and end reasons

use serde::{Deserialize, Serialize};

/// The three session kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// General Session - the root scope, at most one active
    General,
    /// Chatting Session - a chat interaction under a GS, at most one active per GS
    Chatting,
    /// Workflow Session - a workflow execution under a GS, many may coexist
    Workflow,
}

impl SessionKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            SessionKind::General => "gs_",
            SessionKind::Chatting => "cs_",
            SessionKind::Workflow => "ws_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::General => "general",
            SessionKind::Chatting => "chatting",
            SessionKind::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Terminated,
    Error,
}

impl SessionStatus {
    /// Whether the session still counts against active-session invariants
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Error => "error",
        }
    }
}

/// Why a session ended - always a string enum in event payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Timeout,
    Error,
    ParentEnded,
    WorkInterrupt,
    UserRequest,
    Sleep,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Timeout => "timeout",
            EndReason::Error => "error",
            EndReason::ParentEnded => "parent_ended",
            EndReason::WorkInterrupt => "work_interrupt",
            EndReason::UserRequest => "user_request",
            EndReason::Sleep => "sleep",
        }
    }

    /// Whether the state the session was serving completed successfully
    pub fn is_success(&self) -> bool {
        !matches!(self, EndReason::Error)
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task type carried by a Workflow Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsTaskType {
    /// Normal workflow execution driven by the workflow runner
    WorkflowAutomation,
    /// Vehicle for background system reports; no workflow engine is started
    SystemNotification,
}

impl WsTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsTaskType::WorkflowAutomation => "workflow_automation",
            WsTaskType::SystemNotification => "system_notification",
        }
    }
}
