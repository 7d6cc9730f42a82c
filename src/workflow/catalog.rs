//! Catalogue of known workflows

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::WorkMode;

/// A workflow the system knows how to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub work_mode: WorkMode,
}

impl WorkflowDefinition {
    pub fn new(name: &str, description: &str, work_mode: WorkMode) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            work_mode,
        }
    }

    /// Readable form of the name (`drop_and_read` -> `drop and read`)
    pub fn readable_name(&self) -> String {
        self.name.replace('_', " ")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    workflows: Vec<WorkflowDefinition>,
}

/// The set of workflows visible to the validator and the tool bridge
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    workflows: Vec<WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new(workflows: Vec<WorkflowDefinition>) -> Self {
        Self { workflows }
    }

    /// The built-in workflow set
    pub fn builtin() -> Self {
        Self::new(vec![
            WorkflowDefinition::new(
                "get_weather",
                "check the weather forecast and temperature for a location",
                WorkMode::Direct,
            ),
            WorkflowDefinition::new(
                "news_summary",
                "show the latest news headlines and summarize articles",
                WorkMode::Direct,
            ),
            WorkflowDefinition::new(
                "translate_document",
                "translate a document or file to another language",
                WorkMode::Direct,
            ),
            WorkflowDefinition::new(
                "get_world_time",
                "get the time or clock for a timezone",
                WorkMode::Direct,
            ),
            WorkflowDefinition::new(
                "drop_and_read",
                "read a dropped file or document aloud",
                WorkMode::Direct,
            ),
            WorkflowDefinition::new(
                "summarize_and_tag",
                "summarize a document and generate tags",
                WorkMode::Background,
            ),
            WorkflowDefinition::new(
                "clipboard_tracker",
                "track clipboard history and copied content",
                WorkMode::Background,
            ),
            WorkflowDefinition::new(
                "clean_trash_bin",
                "clean the trash bin and remove garbage files",
                WorkMode::Background,
            ),
            WorkflowDefinition::new(
                "code_analysis",
                "analyze code quality and structure",
                WorkMode::Background,
            ),
            WorkflowDefinition::new(
                "ocr_image",
                "recognize text in an image with ocr",
                WorkMode::Direct,
            ),
        ])
    }

    /// Load a catalogue from YAML (`workflows: [{name, description, work_mode}, ...]`)
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let file: CatalogFile = serde_yaml::from_str(content)?;
        info!(count = file.workflows.len(), "workflow catalogue loaded");
        Ok(Self::new(file.workflows))
    }

    pub fn find(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.iter()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
