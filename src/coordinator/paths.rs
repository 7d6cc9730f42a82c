//! Tool catalogue partitioning by path

use tracing::debug;

use crate::llm::{ToolDefinition, ToolPath};
use crate::workflow::{chat_tools, work_tools};

/// Holds every registered tool and answers path-scoped queries
///
/// Path partitioning is enforced here: a tool from the wrong catalogue for
/// the active path is rejected before dispatch.
pub struct ToolCatalogManager {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalogManager {
    /// Catalogue with the standard memory and workflow-control tools
    pub fn standard() -> Self {
        let mut tools = chat_tools();
        tools.extend(work_tools());
        Self { tools }
    }

    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn add_tool(&mut self, tool: ToolDefinition) {
        self.tools.push(tool);
    }

    /// Tools scoped to one path
    pub fn for_path(&self, path: ToolPath) -> Vec<ToolDefinition> {
        let scoped: Vec<ToolDefinition> = self.tools.iter().filter(|t| t.path == path).cloned().collect();
        debug!(path = path.as_str(), count = scoped.len(), "tool catalogue scoped");
        scoped
    }

    pub fn path_of(&self, tool_name: &str) -> Option<ToolPath> {
        self.tools.iter().find(|t| t.name == tool_name).map(|t| t.path)
    }

    /// Whether `tool_name` may be called while `active_path` is in effect
    pub fn allowed(&self, tool_name: &str, active_path: ToolPath) -> bool {
        self.path_of(tool_name) == Some(active_path)
    }

    pub fn tool_names(&self, path: ToolPath) -> Vec<String> {
        self.tools
            .iter()
            .filter(|t| t.path == path)
            .map(|t| t.name.clone())
            .collect()
    }
}
