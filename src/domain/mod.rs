//! Shared domain types for the UEP orchestrator
//!
//! Pure data types and enums used across components. Keeping them here (and
//! free of component imports) breaks the reference cycle between the state
//! manager, state queue, and session manager.

mod id;
mod identity;
mod intent;
mod session;
mod state;

pub use id::new_prefixed_id;
pub use identity::Identity;
pub use intent::{IntentSegment, IntentType};
pub use session::{EndReason, SessionKind, SessionStatus, WsTaskType};
pub use state::{UepState, WorkMode};
