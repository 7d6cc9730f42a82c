//! Reasoning-module boundary
//!
//! The reasoning module (LLM client) is an external collaborator. The
//! coordinator hands it a prompt, a mode, an optionally scoped tool
//! catalogue, and a tool-choice mode; it answers with either structured JSON
//! matching the per-mode schema or a function call.

mod schemas;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use schemas::{
    ChatResponse, DirectResponse, InternalResponse, LearningSignals, MischiefAction, MischiefResponse, SchemaError,
    SessionControl, StatusUpdates, SysAction, SysActionKind, WorkResponse,
};
pub use types::{FunctionCall, ReasonMode, ReasonOutcome, ReasonRequest, ToolChoice, ToolDefinition, ToolPath};

/// Confidence at or above which `session_control.should_end_session` is honoured
pub const SESSION_END_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Error)]
pub enum ReasonError {
    /// The model emitted a function call the client could not decode.
    /// Surfaced as a normal error, not a crash.
    #[error("malformed function call: {0}")]
    MalformedFunctionCall(String),

    #[error("reasoning module unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning request failed: {0}")]
    RequestFailed(String),
}

/// The reasoning module's interface as the coordinator consumes it
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, request: ReasonRequest) -> Result<ReasonOutcome, ReasonError>;
}
