//! Workflow catalogue and runner contract
//!
//! The catalogue describes the workflows the validator can match intents
//! against. The runner is the side-effecting `sys` module boundary; the core
//! only depends on the contract it must honour (start, step review/approval,
//! cancellation between steps, status).

mod bridge;
mod catalog;
mod runner;

pub use bridge::{RpcError, RpcRequest, RpcResponse, ToolBridge, chat_tools, work_tools};
pub use catalog::{WorkflowCatalog, WorkflowDefinition};
pub use runner::{ImmediateRunner, WorkflowError, WorkflowRunner};
