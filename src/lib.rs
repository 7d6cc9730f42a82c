//! UEP Orchestrator - a desktop assistant runtime coordinating pluggable
//! capability modules into coherent user interactions
//!
//! The core is the set of interlocking control structures deciding what
//! runs, when, in what order, on behalf of which session, and when to stop:
//!
//! - a cycle-driven [`r#loop::SystemLoop`] advancing the pipeline one
//!   quantum at a time;
//! - a priority [`queue::StateQueue`] scheduling upcoming user-facing
//!   activities;
//! - a [`state::StateManager`] mapping scheduled states onto sessions;
//! - a three-tier [`session::SessionManager`] (General / Chatting /
//!   Workflow) with lifecycle, nesting, and timeout rules;
//! - a layered [`coordinator::ModuleCoordinator`] routing cycle data through
//!   input, processing, and output;
//! - an [`events::EventBus`] closing the loop from session-end back to
//!   state advancement;
//! - a [`workflow::ToolBridge`] letting the reasoning module launch and
//!   drive workflows;
//! - an [`intent::IntentSegmenter`] splitting raw text into prioritised
//!   states.
//!
//! Capability modules (speech capture, synthesis, the LLM client, the
//! trained intent tagger, workflow actions) are external collaborators
//! registered on the [`modules::ModuleRegistry`].

pub mod chunker;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod domain;
pub mod events;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod modules;
pub mod queue;
pub mod session;
pub mod state;
pub mod status;
pub mod workflow;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use chunker::Chunker;
pub use config::Config;
pub use context::{AccumulationContext, AccumulationDecision, WorkingContext};
pub use coordinator::{CoordinatorError, CycleReport, ModuleCoordinator, ToolCatalogManager};
pub use self::core::Core;
pub use domain::{EndReason, Identity, IntentSegment, IntentType, SessionKind, SessionStatus, UepState, WorkMode};
pub use events::{Event, EventBus, FrontendBus, SystemEvent, create_event_bus};
pub use intent::{BioTagger, HeuristicTagger, IntentSegmenter, RawSegment, WorkflowValidator};
pub use llm::{
    ChatResponse, FunctionCall, ReasonError, ReasonMode, ReasonOutcome, ReasonRequest, Reasoner, ToolChoice,
    ToolDefinition, ToolPath, WorkResponse,
};
pub use memory::{IdentityStore, InMemorySnapshotStore, MemoryError, MemoryStore, Snapshot, SnapshotKind};
pub use modules::{CapturedSpeech, ModuleError, ModuleRegistry, SpeechInput, SpeechOutput, UiSink};
pub use queue::{QueueStatus, StateQueue, StateQueueItem, StateRequest};
pub use r#loop::{LoopConfig, SystemLoop};
pub use session::{Session, SessionError, SessionManager, SessionRecordStore, spawn_timeout_sweeper};
pub use state::{StateChangeContext, StateManager, StateManagerConfig};
pub use status::{StatusModel, StatusSnapshot};
pub use workflow::{
    ImmediateRunner, RpcError, RpcRequest, RpcResponse, ToolBridge, WorkflowCatalog, WorkflowDefinition,
    WorkflowError, WorkflowRunner,
};
