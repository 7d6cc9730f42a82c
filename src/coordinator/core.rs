//! ModuleCoordinator - the layered engine between the System Loop and the
//! capability modules
//!
//! Three layers run in strict order within one cycle:
//! 1. input: speech capture + intent segmentation (skipped when a promoted
//!    queue state supplied the content);
//! 2. processing: identity resolution, path-scoped tool catalogue, reasoner
//!    call, snapshot writes, tool dispatch;
//! 3. output: TTS chunking and UI events.
//!
//! Each layer publishes its `*_LAYER_COMPLETE` event. A layer failure ends
//! the current session with reason `error` and the output layer emits a
//! short human-readable fallback instead of staying silent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chunker::Chunker;
use crate::context::WorkingContext;
use crate::domain::{EndReason, Identity, IntentSegment, IntentType};
use crate::events::{Event, EventBus, FrontendBus, SystemEvent};
use crate::intent::IntentSegmenter;
use crate::llm::{
    ChatResponse, DirectResponse, FunctionCall, InternalResponse, MischiefAction, MischiefResponse, ReasonError,
    ReasonMode, ReasonOutcome, ReasonRequest, SESSION_END_CONFIDENCE, SchemaError, StatusUpdates, SysActionKind,
    ToolChoice, ToolPath, WorkResponse,
};
use crate::memory::{IdentityStore, MemoryStore};
use crate::modules::{ModuleError, ModuleRegistry};
use crate::queue::StateQueue;
use crate::session::{SessionError, SessionManager};
use crate::status::StatusModel;
use crate::workflow::ToolBridge;

use super::paths::ToolCatalogManager;

/// Spoken when a cycle ends in error; no silent failure
pub const OUTPUT_ERROR_FALLBACK: &str = "Sorry, I could not generate a response";

/// Working-context key holding retrieval results awaiting the next prompt
const KEY_PENDING_RETRIEVAL: &str = "pending_retrieval";
/// Working-context key holding a tool error to surface on the next turn
const KEY_PENDING_TOOL_ERROR: &str = "pending_tool_error";

const SPEAKER_SAMPLE_THRESHOLD: usize = 3;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no reasoning module registered")]
    NoReasoner,

    #[error(transparent)]
    Reason(#[from] ReasonError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("tool {name} is not available on {path}")]
    ToolPathViolation { name: String, path: &'static str },

    #[error("tool {name} timed out after {timeout_ms}ms")]
    ToolTimeout { name: String, timeout_ms: u64 },

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_index: u64,
    /// False for idle cycles (no input, nothing pending)
    pub ran: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl CycleReport {
    fn idle(cycle_index: u64) -> Self {
        Self {
            cycle_index,
            ran: false,
            success: true,
            error: None,
        }
    }

    fn ok(cycle_index: u64) -> Self {
        Self {
            cycle_index,
            ran: true,
            success: true,
            error: None,
        }
    }

    fn failed(cycle_index: u64, error: String) -> Self {
        Self {
            cycle_index,
            ran: true,
            success: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingInput {
    text: String,
    metadata: Value,
    system_report: bool,
}

struct InputData {
    text: String,
    segments: Vec<IntentSegment>,
    system_report: bool,
}

pub struct ModuleCoordinator {
    bus: Arc<EventBus>,
    frontend: Arc<FrontendBus>,
    context: Arc<WorkingContext>,
    sessions: Arc<SessionManager>,
    identities: Arc<IdentityStore>,
    memory: Arc<dyn MemoryStore>,
    status: Arc<StatusModel>,
    registry: Arc<ModuleRegistry>,
    bridge: Arc<ToolBridge>,
    catalog: ToolCatalogManager,
    segmenter: Arc<IntentSegmenter>,
    queue: Arc<StateQueue>,
    chunker: Chunker,
    tool_timeout: Duration,
    pending_input: Mutex<Option<PendingInput>>,
    end_cs_flag: Mutex<Option<EndReason>>,
}

#[allow(clippy::too_many_arguments)]
impl ModuleCoordinator {
    pub fn new(
        bus: Arc<EventBus>,
        frontend: Arc<FrontendBus>,
        context: Arc<WorkingContext>,
        sessions: Arc<SessionManager>,
        identities: Arc<IdentityStore>,
        memory: Arc<dyn MemoryStore>,
        status: Arc<StatusModel>,
        registry: Arc<ModuleRegistry>,
        bridge: Arc<ToolBridge>,
        segmenter: Arc<IntentSegmenter>,
        queue: Arc<StateQueue>,
        chunker: Chunker,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            frontend,
            context,
            sessions,
            identities,
            memory,
            status,
            registry,
            bridge,
            catalog: ToolCatalogManager::standard(),
            segmenter,
            queue,
            chunker,
            tool_timeout,
            pending_input: Mutex::new(None),
            end_cs_flag: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &ToolCatalogManager {
        &self.catalog
    }

    /// Subscribe the per-cycle skip-input mechanism to `STATE_ADVANCED`
    pub fn subscribe(self: &Arc<Self>) {
        let coordinator = self.clone();
        self.bus
            .subscribe(SystemEvent::StateAdvanced, "module_coordinator", move |event| {
                coordinator.note_state_advanced(event);
            });
    }

    fn note_state_advanced(&self, event: &Event) {
        let Some(content) = event.str_field("content") else {
            return;
        };
        let metadata = event.value_field("metadata").cloned().unwrap_or(Value::Null);
        let system_report = metadata
            .get("workflow_type")
            .and_then(Value::as_str)
            .map(|t| t == "system_report")
            .unwrap_or(false)
            || metadata.get("system_report").and_then(Value::as_bool).unwrap_or(false);

        debug!(content, system_report, "input skip noted for promoted state");
        *self.pending_input.lock().expect("pending input lock poisoned") = Some(PendingInput {
            text: content.to_string(),
            metadata,
            system_report,
        });
    }

    /// Fast-path content straight into the processing layer
    ///
    /// Used for SYSTEM_NOTIFICATION sessions: the input layer is skipped and
    /// an `INPUT_LAYER_COMPLETE` is synthesised on the spot.
    pub fn inject_system_report(&self, text: &str, metadata: Value) {
        info!(text, "system report injected");
        *self.pending_input.lock().expect("pending input lock poisoned") = Some(PendingInput {
            text: text.to_string(),
            metadata: metadata.clone(),
            system_report: true,
        });
        self.bus.publish(
            SystemEvent::InputLayerComplete,
            json!({
                "text": text,
                "system_report": true,
                "system_initiated": true,
                "metadata": metadata,
                "nlp_result": {"primary_intent": "work", "overall_confidence": 1.0, "segments": []},
            }),
            "state_manager",
        );
    }

    /// Run one full input -> processing -> output traversal
    pub async fn run_cycle(&self, cycle_index: u64) -> CycleReport {
        let input = match self.run_input_layer(cycle_index).await {
            Ok(Some(input)) => input,
            Ok(None) => return CycleReport::idle(cycle_index),
            Err(e) => {
                self.handle_cycle_error(cycle_index, &e).await;
                return CycleReport::failed(cycle_index, e.to_string());
            }
        };

        let output_text = match self.run_processing_layer(cycle_index, &input).await {
            Ok(text) => text,
            Err(e) => {
                self.handle_cycle_error(cycle_index, &e).await;
                return CycleReport::failed(cycle_index, e.to_string());
            }
        };

        if let Err(e) = self.run_output_layer(cycle_index, &output_text).await {
            self.handle_cycle_error(cycle_index, &e).await;
            return CycleReport::failed(cycle_index, e.to_string());
        }

        if input.system_report {
            self.finish_system_report();
        }
        self.finish_cycle_session_control();
        CycleReport::ok(cycle_index)
    }

    // === Input layer ===

    async fn run_input_layer(&self, cycle_index: u64) -> Result<Option<InputData>, CoordinatorError> {
        // A promoted queue state bypasses the microphone
        let pending = self.pending_input.lock().expect("pending input lock poisoned").take();
        if let Some(pending) = pending {
            let segments = self.segments_for_pending(&pending);
            self.bus.publish(
                SystemEvent::InputLayerComplete,
                json!({
                    "text": pending.text,
                    "cycle_index": cycle_index,
                    "skipped_capture": true,
                    "nlp_result": {"segments": segments.len()},
                }),
                "module_coordinator",
            );
            return Ok(Some(InputData {
                text: pending.text,
                segments,
                system_report: pending.system_report,
            }));
        }

        let Some(stt) = self.registry.stt() else {
            return Ok(None);
        };
        let Some(captured) = stt.capture().await? else {
            return Ok(None);
        };

        debug!(text = %captured.text, speaker = ?captured.speaker_id, "speech captured");
        self.status.mark_interaction();
        if let Some(speaker_id) = &captured.speaker_id {
            self.resolve_speaker(speaker_id, &captured.text);
        }

        let segments = self.segmenter.segment(&captured.text);
        self.bus.publish(
            SystemEvent::InputLayerComplete,
            json!({
                "text": captured.text,
                "cycle_index": cycle_index,
                "skipped_capture": false,
                "nlp_result": {"segments": segments.len()},
            }),
            "module_coordinator",
        );

        // An explicit command during an active chat interrupts it
        if let Some(cs) = self.sessions.current_chatting() {
            if let Some(workflow) = self.segmenter.validator().is_confident_match(&captured.text) {
                info!(workflow = %workflow.name, "work interrupt during chat");
                let mut metadata = Map::new();
                metadata.insert("matched_workflow".to_string(), json!(workflow.name));
                metadata.insert("work_mode".to_string(), json!(workflow.work_mode.as_str()));
                self.queue
                    .interrupt_chat_for_work(&captured.text, captured.speaker_id.as_deref(), Some(metadata));
                self.sessions
                    .end_chatting_session_with_reason(&cs.session_id, true, EndReason::WorkInterrupt)?;
                return Ok(None);
            }

            // Plain conversation turn inside the active chat session
            if segments.iter().all(|s| {
                matches!(
                    s.intent_type,
                    IntentType::Chat | IntentType::Call | IntentType::Unknown
                )
            }) {
                self.sessions.touch(&cs.session_id);
                return Ok(Some(InputData {
                    text: captured.text,
                    segments,
                    system_report: false,
                }));
            }
        }

        // No session owns this text yet: schedule states and let the queue
        // feed later cycles through the skip-input path
        self.queue.process_nlp_intents(&segments);
        Ok(None)
    }

    fn segments_for_pending(&self, pending: &PendingInput) -> Vec<IntentSegment> {
        // The queue item was segmented before it was enqueued; rebuild a
        // single segment from its metadata rather than re-tagging
        let intent = pending
            .metadata
            .get("intent_type")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value::<IntentType>(json!(s)).ok())
            .unwrap_or(IntentType::Chat);
        let confidence = pending
            .metadata
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let mut segment = IntentSegment::new(pending.text.clone(), intent, confidence);
        if let Value::Object(map) = &pending.metadata {
            for (key, value) in map {
                segment.set_meta(key, value.clone());
            }
        }
        vec![segment]
    }

    fn resolve_speaker(&self, speaker_id: &str, text: &str) {
        if let Some(identity) = self.identities.by_speaker(speaker_id) {
            self.context.set_current_identity(&identity);
            return;
        }

        // Unknown speaker: accumulate samples until identity policy decides
        let accumulator = format!("speaker_{speaker_id}");
        if self.context.accumulator(&accumulator).is_none() {
            self.context.register_accumulator(
                &accumulator,
                "speaker_identification",
                SPEAKER_SAMPLE_THRESHOLD,
                json!({"speaker_id": speaker_id}),
            );
        }
        let decision = self
            .context
            .add_sample(&accumulator, json!({"speaker_id": speaker_id, "text": text}));
        if decision == Some(crate::context::AccumulationDecision::CreateIdentity) {
            let identity = self.identities.ensure_identity(speaker_id, speaker_id);
            info!(speaker_id, identity_id = %identity.identity_id, "identity created from accumulated samples");
            self.context.set_current_identity(&identity);
        }
    }

    // === Processing layer ===

    fn resolve_identity(&self) -> Identity {
        // Declared override > working-context current > default
        if let Some(declared) = self.context.declared_identity_id() {
            if let Some(identity) = self.identities.get(&declared) {
                return identity;
            }
            warn!(%declared, "declared identity unknown, falling back");
        }
        self.context
            .current_identity()
            .unwrap_or_else(|| self.identities.debug_identity())
    }

    fn active_path(&self) -> (ToolPath, Option<String>) {
        // A live WS wins (a WS may be spawned while a CS is active)
        if let Some(ws_id) = self.sessions.active_workflow_ids().into_iter().next_back() {
            return (ToolPath::PathWork, Some(ws_id));
        }
        (ToolPath::PathChat, None)
    }

    fn build_prompt(&self, text: &str) -> String {
        let mut prompt = String::new();
        // Retrieval results and tool errors from the previous turn are
        // concatenated here rather than eagerly injected
        if let Some(retrieved) = self.context.remove(KEY_PENDING_RETRIEVAL) {
            if let Some(retrieved) = retrieved.as_str() {
                prompt.push_str("[retrieved memory]\n");
                prompt.push_str(retrieved);
                prompt.push_str("\n\n");
            }
        }
        if let Some(tool_error) = self.context.remove(KEY_PENDING_TOOL_ERROR) {
            if let Some(tool_error) = tool_error.as_str() {
                prompt.push_str("[previous tool error]\n");
                prompt.push_str(tool_error);
                prompt.push_str("\n\n");
            }
        }
        prompt.push_str(text);
        prompt
    }

    async fn run_processing_layer(&self, cycle_index: u64, input: &InputData) -> Result<String, CoordinatorError> {
        let reasoner = self.registry.reasoner().ok_or(CoordinatorError::NoReasoner)?;
        let identity = self.resolve_identity();

        let is_response = input
            .segments
            .first()
            .map(|s| s.intent_type == IntentType::Response)
            .unwrap_or(false);

        let (mode, path, active_ws) = if input.system_report {
            (ReasonMode::Internal, None, None)
        } else if is_response {
            // A pre-formed workflow reply: no tool loop, the reasoner only
            // shapes the reply text
            let (_, ws) = self.active_path();
            (ReasonMode::Direct, None, ws)
        } else {
            let (path, ws) = self.active_path();
            let mode = match path {
                ToolPath::PathWork => ReasonMode::Work,
                ToolPath::PathChat => ReasonMode::Chat,
            };
            (mode, Some(path), ws)
        };

        let tools = path.map(|p| self.catalog.for_path(p)).unwrap_or_default();
        let tool_choice = match (path, &active_ws) {
            // The WORK path forces a tool call unless a step awaits review
            (Some(ToolPath::PathWork), Some(ws_id)) if !tools.is_empty() => {
                if self.bridge.runner().has_pending_step(ws_id) {
                    ToolChoice::Auto
                } else {
                    ToolChoice::Any
                }
            }
            _ => ToolChoice::Auto,
        };

        let request = ReasonRequest::new(self.build_prompt(&input.text), mode).with_tools(tools, tool_choice);
        debug!(mode = mode.as_str(), tool_choice = ?request.tool_choice, "reasoning");
        let outcome = reasoner.reason(request).await?;

        let output_text = match outcome {
            ReasonOutcome::Structured(value) => {
                self.bus.publish(
                    SystemEvent::LlmResponseGenerated,
                    json!({"mode": mode.as_str(), "cycle_index": cycle_index}),
                    "module_coordinator",
                );
                self.handle_structured(mode, value, &identity, input).await?
            }
            ReasonOutcome::FunctionCall(call) => {
                self.handle_function_call(path, &call, active_ws.as_deref(), &identity)
                    .await?
            }
        };

        self.bus.publish(
            SystemEvent::ProcessingLayerComplete,
            json!({
                "cycle_index": cycle_index,
                "mode": mode.as_str(),
                "identity_id": identity.identity_id,
                "segments": input.segments.len(),
            }),
            "module_coordinator",
        );
        Ok(output_text)
    }

    async fn handle_structured(
        &self,
        mode: ReasonMode,
        value: Value,
        identity: &Identity,
        input: &InputData,
    ) -> Result<String, CoordinatorError> {
        match mode {
            ReasonMode::Chat => {
                let response = ChatResponse::parse(value)?;
                if let Some(updates) = &response.status_updates {
                    self.apply_status_updates(updates);
                }
                if let Some(observation) = &response.memory_observation {
                    if let Ok(snapshot) = self.memory.store_observation(&identity.memory_token, observation) {
                        self.publish_memory_created(&snapshot.id, &identity.memory_token, "observation");
                    }
                }

                // End-of-turn snapshot under the current identity's token
                match self.memory.store_snapshot(&identity.memory_token, &response.text) {
                    Ok(snapshot) => {
                        self.publish_memory_created(&snapshot.id, &identity.memory_token, "snapshot");
                    }
                    Err(e) => warn!(error = %e, "snapshot write failed"),
                }

                if response.wants_session_end(SESSION_END_CONFIDENCE) {
                    debug!("model signalled session end");
                    *self.end_cs_flag.lock().expect("end flag lock poisoned") = Some(EndReason::Completed);
                }
                Ok(response.text)
            }
            ReasonMode::Work => {
                let response = WorkResponse::parse(value)?;
                if let Some(updates) = &response.status_updates {
                    self.apply_status_updates(updates);
                }
                let (_, active_ws) = self.active_path();
                match response.sys_action.action {
                    SysActionKind::StartWorkflow => {
                        let call = FunctionCall {
                            name: "start_workflow".to_string(),
                            args: json!({
                                "workflow_name": response.sys_action.target.clone(),
                                "command": input.text,
                            }),
                        };
                        self.dispatch_tool(&call, active_ws.as_deref(), Some(&identity.memory_token))
                            .await?;
                    }
                    SysActionKind::ExecuteFunction => {
                        let call = FunctionCall {
                            name: response.sys_action.target.clone(),
                            args: response.sys_action.parameters.clone(),
                        };
                        self.dispatch_tool(&call, active_ws.as_deref(), Some(&identity.memory_token))
                            .await?;
                    }
                    SysActionKind::ProvideOptions => {
                        debug!("work response provides options, no action dispatched");
                    }
                }
                Ok(response.text)
            }
            ReasonMode::Internal => {
                let response = InternalResponse::parse(value)?;
                Ok(response.text)
            }
            ReasonMode::Direct => {
                let response = DirectResponse::parse(value)?;
                // The reply feeds the waiting workflow when one asked for it
                let (_, active_ws) = self.active_path();
                if let Some(ws_id) = active_ws.as_deref() {
                    if self.bridge.runner().has_pending_step(ws_id) {
                        let call = FunctionCall {
                            name: "provide_workflow_input".to_string(),
                            args: json!({"input": response.text.clone()}),
                        };
                        self.dispatch_tool(&call, Some(ws_id), Some(&identity.memory_token))
                            .await?;
                    }
                }
                Ok(response.text)
            }
            ReasonMode::Mischief => {
                // Mischief planning goes through plan_mischief, not cycles
                warn!("mischief response in a cycle context, ignoring");
                Ok(String::new())
            }
        }
    }

    async fn handle_function_call(
        &self,
        path: Option<ToolPath>,
        call: &FunctionCall,
        active_ws: Option<&str>,
        identity: &Identity,
    ) -> Result<String, CoordinatorError> {
        let Some(active_path) = path else {
            return Err(CoordinatorError::ToolPathViolation {
                name: call.name.clone(),
                path: "none",
            });
        };
        if !self.catalog.allowed(&call.name, active_path) {
            return Err(CoordinatorError::ToolPathViolation {
                name: call.name.clone(),
                path: active_path.as_str(),
            });
        }

        let response = self
            .dispatch_tool(call, active_ws, Some(&identity.memory_token))
            .await?;

        // Retrieval results feed the next prompt; other results are
        // conversation-internal and produce no spoken output
        if call.name == "memory_retrieve_snapshots" {
            if let Some(result) = response.result() {
                let joined = result["snapshots"]
                    .as_array()
                    .map(|snapshots| {
                        snapshots
                            .iter()
                            .filter_map(|s| s["text"].as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                self.context.set(KEY_PENDING_RETRIEVAL, json!(joined));
            }
        }
        Ok(String::new())
    }

    async fn dispatch_tool(
        &self,
        call: &FunctionCall,
        active_ws: Option<&str>,
        memory_token: Option<&str>,
    ) -> Result<crate::workflow::RpcResponse, CoordinatorError> {
        let dispatch = self.bridge.dispatch(call, active_ws, memory_token);
        let response = match tokio::time::timeout(self.tool_timeout, dispatch).await {
            Ok(response) => response,
            Err(_) => {
                let timeout_ms = self.tool_timeout.as_millis() as u64;
                error!(tool = %call.name, timeout_ms, "tool timed out");
                self.context.set(
                    KEY_PENDING_TOOL_ERROR,
                    json!(format!("tool {} timed out after {}ms", call.name, timeout_ms)),
                );
                return Err(CoordinatorError::ToolTimeout {
                    name: call.name.clone(),
                    timeout_ms,
                });
            }
        };

        if let Some(rpc_error) = response.error() {
            warn!(tool = %call.name, error = %rpc_error.message, "tool returned an error");
            // Surfaced to the model on its next turn, not fatal to the cycle
            self.context.set(
                KEY_PENDING_TOOL_ERROR,
                json!(format!("tool {} failed: {}", call.name, rpc_error.message)),
            );
        }
        Ok(response)
    }

    fn apply_status_updates(&self, updates: &StatusUpdates) {
        self.status.update_mood(updates.mood_delta, "llm_status_update");
        self.status.update_pride(updates.pride_delta, "llm_status_update");
        self.status
            .update_helpfulness(updates.helpfulness_delta, "llm_status_update");
        self.status.update_boredom(updates.boredom_delta, "llm_status_update");
    }

    fn publish_memory_created(&self, snapshot_id: &str, memory_token: &str, kind: &str) {
        self.bus.publish(
            SystemEvent::MemoryCreated,
            json!({
                "snapshot_id": snapshot_id,
                "memory_token": memory_token,
                "kind": kind,
            }),
            "module_coordinator",
        );
    }

    // === Output layer ===

    async fn run_output_layer(&self, cycle_index: u64, text: &str) -> Result<(), CoordinatorError> {
        let mut chunk_count = 0usize;
        if !text.is_empty() {
            let chunks = self.chunker.split_text(text);
            chunk_count = chunks.len();
            let tts = self.registry.tts();
            let ui = self.registry.ui();

            for chunk in &chunks {
                if let Some(tts) = &tts {
                    tts.synthesize(chunk).await?;
                }
                if let Some(ui) = &ui {
                    ui.show_subtitle(chunk);
                    self.frontend.publish("subtitle", &json!({"text": chunk}));
                }
                self.bus.publish(
                    SystemEvent::TtsOutputGenerated,
                    json!({"cycle_index": cycle_index, "text": chunk}),
                    "module_coordinator",
                );
            }
        }

        self.bus.publish(
            SystemEvent::OutputLayerComplete,
            json!({"cycle_index": cycle_index, "chunks": chunk_count}),
            "module_coordinator",
        );
        Ok(())
    }

    /// A notification WS ends as soon as its report has been delivered
    fn finish_system_report(&self) {
        for ws_id in self.sessions.active_workflow_ids() {
            let is_notification = self
                .sessions
                .get(&ws_id)
                .and_then(|ws| ws.meta_str("task_type").map(str::to_string))
                .map(|t| t == "system_notification")
                .unwrap_or(false);
            if is_notification {
                info!(session_id = %ws_id, "system notification delivered, ending WS");
                let _ = self
                    .sessions
                    .end_workflow_session(&ws_id, json!({"status": "delivered"}));
            }
        }
    }

    /// Apply a model-signalled CS termination at end of cycle
    fn finish_cycle_session_control(&self) {
        let flagged = self.end_cs_flag.lock().expect("end flag lock poisoned").take();
        if let Some(reason) = flagged {
            if let Some(cs) = self.sessions.current_chatting() {
                info!(session_id = %cs.session_id, %reason, "ending chat session per session_control");
                if let Err(e) = self
                    .sessions
                    .end_chatting_session_with_reason(&cs.session_id, true, reason)
                {
                    warn!(error = %e, "session_control end failed");
                }
            }
        }
    }

    // === Error path ===

    async fn handle_cycle_error(&self, cycle_index: u64, error: &CoordinatorError) {
        error!(cycle_index, %error, "cycle failed");

        // End whatever session the cycle was serving with reason `error`
        if let Some(ws_id) = self.sessions.active_workflow_ids().into_iter().next_back() {
            let _ = self.sessions.end_session(&ws_id, EndReason::Error);
            self.bus.publish(
                SystemEvent::WorkflowFailed,
                json!({"session_id": ws_id, "error": error.to_string()}),
                "module_coordinator",
            );
        } else if let Some(cs) = self.sessions.current_chatting() {
            let _ = self.sessions.end_session(&cs.session_id, EndReason::Error);
        }

        // User-visible failure: short spoken fallback plus a UI indicator
        if let Some(tts) = self.registry.tts() {
            let _ = tts.synthesize(OUTPUT_ERROR_FALLBACK).await;
        }
        if let Some(ui) = self.registry.ui() {
            ui.show_error_indicator();
        }
        self.bus.publish(
            SystemEvent::OutputLayerComplete,
            json!({"cycle_index": cycle_index, "chunks": 0, "error": error.to_string()}),
            "module_coordinator",
        );
    }

    // === Mischief planning ===

    /// Ask the reasoner for mischief actions, filtered by current mood
    pub async fn plan_mischief(&self) -> Result<Vec<MischiefAction>, CoordinatorError> {
        let reasoner = self.registry.reasoner().ok_or(CoordinatorError::NoReasoner)?;
        let request = ReasonRequest::new(
            "Plan a short list of harmless autonomous actions.",
            ReasonMode::Mischief,
        );
        let outcome = reasoner.reason(request).await?;
        let ReasonOutcome::Structured(value) = outcome else {
            return Err(CoordinatorError::Reason(ReasonError::MalformedFunctionCall(
                "mischief planning returned a function call".to_string(),
            )));
        };
        let response = MischiefResponse::parse(value)?;

        let mood = self.status.snapshot().mood;
        let actions: Vec<MischiefAction> = response
            .actions
            .into_iter()
            .filter(|action| mood >= action.min_mood())
            .collect();
        info!(count = actions.len(), mood, "mischief actions planned");
        Ok(actions)
    }
}
