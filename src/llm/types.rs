//! Request/response types for the reasoning module

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic mode the reasoner is invoked in; selects the response schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonMode {
    Chat,
    Work,
    Direct,
    Internal,
    Mischief,
}

impl ReasonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonMode::Chat => "chat",
            ReasonMode::Work => "work",
            ReasonMode::Direct => "direct",
            ReasonMode::Internal => "internal",
            ReasonMode::Mischief => "mischief",
        }
    }
}

/// Tag determining in which semantic mode a tool may be called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolPath {
    /// Memory tools; the model decides whether to retrieve
    PathChat,
    /// Workflow control tools
    PathWork,
}

impl ToolPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolPath::PathChat => "PATH_CHAT",
            ToolPath::PathWork => "PATH_WORK",
        }
    }
}

/// Tool definition in the vendor's function-calling shape, plus its path tag
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub path: ToolPath,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value, path: ToolPath) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            path,
        }
    }
}

/// How strongly the model is steered toward calling a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides
    Auto,
    /// Force-call some tool from the catalogue
    Any,
}

/// Everything needed for one reasoning call
#[derive(Debug, Clone)]
pub struct ReasonRequest {
    pub prompt: String,
    pub mode: ReasonMode,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
}

impl ReasonRequest {
    pub fn new(prompt: impl Into<String>, mode: ReasonMode) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, tool_choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = tool_choice;
        self
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

/// What the reasoner produced
#[derive(Debug, Clone)]
pub enum ReasonOutcome {
    /// Structured JSON matching the per-mode response schema
    Structured(Value),
    /// A function call to dispatch through the tool bridge
    FunctionCall(FunctionCall),
}
