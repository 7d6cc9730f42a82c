//! Tool bridge - dispatches model function calls over a JSON-RPC-like shape
//!
//! Workflow control tools route to the workflow runner; memory tools route to
//! the snapshot store. Before dispatch the bridge validates required
//! parameters and injects system-level values - most importantly the current
//! workflow session id, overriding anything the model supplied.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::llm::{FunctionCall, ToolDefinition, ToolPath};
use crate::memory::MemoryStore;

use super::runner::WorkflowRunner;

pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INTERNAL: i64 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: i64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: i64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{ result }` on success, `{ error: { code, message, data? } }` on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Result { result: Value },
    Error { error: RpcError },
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        RpcResponse::Result { result }
    }

    pub fn err(code: i64, message: impl Into<String>) -> Self {
        RpcResponse::Error {
            error: RpcError {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResponse::Result { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            RpcResponse::Result { result } => Some(result),
            RpcResponse::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            RpcResponse::Error { error } => Some(error),
            RpcResponse::Result { .. } => None,
        }
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The PATH_CHAT catalogue: memory tools only
pub fn chat_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "memory_retrieve_snapshots",
            "Retrieve stored memory snapshots matching a query",
            object_schema(
                json!({
                    "query": {"type": "string", "description": "Text to match against snapshots"},
                    "limit": {"type": "integer", "description": "Maximum snapshots to return"},
                }),
                &["query"],
            ),
            ToolPath::PathChat,
        ),
        ToolDefinition::new(
            "memory_get_snapshot",
            "Fetch a single snapshot by id",
            object_schema(json!({"snapshot_id": {"type": "string"}}), &["snapshot_id"]),
            ToolPath::PathChat,
        ),
        ToolDefinition::new(
            "memory_search_timeline",
            "List snapshots created within a time range",
            object_schema(
                json!({
                    "from": {"type": "string", "format": "date-time"},
                    "to": {"type": "string", "format": "date-time"},
                }),
                &["from", "to"],
            ),
            ToolPath::PathChat,
        ),
        ToolDefinition::new(
            "memory_update_profile",
            "Replace the stored user profile",
            object_schema(json!({"profile": {"type": "object"}}), &["profile"]),
            ToolPath::PathChat,
        ),
        ToolDefinition::new(
            "memory_store_observation",
            "Store an observation about the user",
            object_schema(json!({"text": {"type": "string"}}), &["text"]),
            ToolPath::PathChat,
        ),
    ]
}

/// The PATH_WORK catalogue: workflow control tools only
pub fn work_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "start_workflow",
            "Launch a known workflow for the current workflow session",
            object_schema(
                json!({
                    "workflow_name": {"type": "string"},
                    "command": {"type": "string", "description": "The user command driving the workflow"},
                    "session_id": {"type": "string"},
                }),
                &["workflow_name", "command"],
            ),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "get_workflow_status",
            "Report the status of the current workflow",
            object_schema(json!({"session_id": {"type": "string"}}), &[]),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "review_step",
            "Fetch a workflow step for review",
            object_schema(
                json!({"session_id": {"type": "string"}, "step_id": {"type": "string"}}),
                &["step_id"],
            ),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "approve_step",
            "Approve a reviewed workflow step",
            object_schema(
                json!({"session_id": {"type": "string"}, "step_id": {"type": "string"}}),
                &["step_id"],
            ),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "modify_step",
            "Modify a workflow step before approval",
            object_schema(
                json!({
                    "session_id": {"type": "string"},
                    "step_id": {"type": "string"},
                    "changes": {"type": "object"},
                }),
                &["step_id", "changes"],
            ),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "cancel_workflow",
            "Cancel the current workflow between steps",
            object_schema(json!({"session_id": {"type": "string"}}), &[]),
            ToolPath::PathWork,
        ),
        ToolDefinition::new(
            "provide_workflow_input",
            "Provide input a waiting workflow asked for",
            object_schema(
                json!({"session_id": {"type": "string"}, "input": {}}),
                &["input"],
            ),
            ToolPath::PathWork,
        ),
    ]
}

fn required_params(method: &str) -> &'static [&'static str] {
    match method {
        "start_workflow" => &["workflow_name", "command"],
        "review_step" | "approve_step" => &["step_id"],
        "modify_step" => &["step_id", "changes"],
        "provide_workflow_input" => &["input"],
        "memory_retrieve_snapshots" => &["query"],
        "memory_get_snapshot" => &["snapshot_id"],
        "memory_search_timeline" => &["from", "to"],
        "memory_update_profile" => &["profile"],
        "memory_store_observation" => &["text"],
        _ => &[],
    }
}

pub struct ToolBridge {
    memory: Arc<dyn MemoryStore>,
    runner: Arc<dyn WorkflowRunner>,
    next_id: AtomicI64,
}

impl ToolBridge {
    pub fn new(memory: Arc<dyn MemoryStore>, runner: Arc<dyn WorkflowRunner>) -> Self {
        Self {
            memory,
            runner,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn runner(&self) -> &Arc<dyn WorkflowRunner> {
        &self.runner
    }

    /// Dispatch a model function call
    ///
    /// `active_ws` is the current workflow session id (injected as
    /// `session_id`, overriding any model-supplied value); `memory_token` is
    /// the current identity's token for memory tools.
    pub async fn dispatch(
        &self,
        call: &FunctionCall,
        active_ws: Option<&str>,
        memory_token: Option<&str>,
    ) -> RpcResponse {
        let mut params = match &call.args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => {
                return RpcResponse::err(ERR_INVALID_PARAMS, "tool arguments must be an object");
            }
        };

        // System-level injection wins over whatever the model supplied
        if let Some(ws_id) = active_ws {
            params.insert("session_id".to_string(), json!(ws_id));
        }

        for key in required_params(&call.name) {
            if !params.contains_key(*key) {
                warn!(method = %call.name, missing = key, "tool call missing required parameter");
                return RpcResponse::err(
                    ERR_INVALID_PARAMS,
                    format!("missing required parameter: {key}"),
                );
            }
        }

        let request = RpcRequest::new(
            call.name.clone(),
            Value::Object(params.clone()),
            self.next_id.fetch_add(1, Ordering::SeqCst),
        );
        debug!(method = %request.method, id = request.id, "tool dispatch");

        let str_param = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);
        let session_id = str_param("session_id").unwrap_or_default();

        match request.method.as_str() {
            "start_workflow" => {
                if session_id.is_empty() {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no active workflow session");
                }
                let workflow_name = str_param("workflow_name").unwrap_or_default();
                let command = str_param("command").unwrap_or_default();
                self.wrap(self.runner.start_workflow(&session_id, &workflow_name, &command).await)
            }
            "get_workflow_status" => self.wrap(self.runner.get_status(&session_id).await),
            "review_step" => {
                let step_id = str_param("step_id").unwrap_or_default();
                self.wrap(self.runner.review_step(&session_id, &step_id).await)
            }
            "approve_step" => {
                let step_id = str_param("step_id").unwrap_or_default();
                self.wrap(self.runner.approve_step(&session_id, &step_id).await)
            }
            "modify_step" => {
                let step_id = str_param("step_id").unwrap_or_default();
                let changes = params.get("changes").cloned().unwrap_or(Value::Null);
                self.wrap(self.runner.modify_step(&session_id, &step_id, changes).await)
            }
            "cancel_workflow" => self.wrap(self.runner.cancel_workflow(&session_id).await),
            "provide_workflow_input" => {
                let input = params.get("input").cloned().unwrap_or(Value::Null);
                self.wrap(self.runner.provide_input(&session_id, input).await)
            }

            "memory_retrieve_snapshots" => {
                let Some(token) = memory_token else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no memory token for current identity");
                };
                let query = str_param("query").unwrap_or_default();
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
                let snapshots = self.memory.retrieve_snapshots(token, &query, limit);
                RpcResponse::ok(json!({"snapshots": snapshots}))
            }
            "memory_get_snapshot" => {
                let Some(token) = memory_token else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no memory token for current identity");
                };
                let snapshot_id = str_param("snapshot_id").unwrap_or_default();
                match self.memory.get_snapshot(token, &snapshot_id) {
                    Ok(snapshot) => RpcResponse::ok(json!({"snapshot": snapshot})),
                    Err(e) => RpcResponse::err(ERR_INTERNAL, e.to_string()),
                }
            }
            "memory_search_timeline" => {
                let Some(token) = memory_token else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no memory token for current identity");
                };
                let parse_time = |key: &str| -> Option<DateTime<Utc>> {
                    str_param(key).and_then(|s| s.parse().ok())
                };
                let (Some(from), Some(to)) = (parse_time("from"), parse_time("to")) else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "from/to must be RFC 3339 timestamps");
                };
                let snapshots = self.memory.search_timeline(token, from, to);
                RpcResponse::ok(json!({"snapshots": snapshots}))
            }
            "memory_update_profile" => {
                let Some(token) = memory_token else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no memory token for current identity");
                };
                let profile = params.get("profile").cloned().unwrap_or(Value::Null);
                match self.memory.update_profile(token, profile) {
                    Ok(()) => RpcResponse::ok(json!({"updated": true})),
                    Err(e) => RpcResponse::err(ERR_INTERNAL, e.to_string()),
                }
            }
            "memory_store_observation" => {
                let Some(token) = memory_token else {
                    return RpcResponse::err(ERR_INVALID_PARAMS, "no memory token for current identity");
                };
                let text = str_param("text").unwrap_or_default();
                match self.memory.store_observation(token, &text) {
                    Ok(snapshot) => RpcResponse::ok(json!({"snapshot_id": snapshot.id})),
                    Err(e) => RpcResponse::err(ERR_INTERNAL, e.to_string()),
                }
            }

            other => RpcResponse::err(ERR_METHOD_NOT_FOUND, format!("unknown method: {other}")),
        }
    }

    fn wrap(&self, result: Result<Value, super::runner::WorkflowError>) -> RpcResponse {
        match result {
            Ok(value) => RpcResponse::ok(value),
            Err(e) => RpcResponse::err(ERR_INTERNAL, e.to_string()),
        }
    }
}
