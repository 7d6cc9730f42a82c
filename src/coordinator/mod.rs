//! Module Coordinator - drives the input, processing, and output layers per
//! cycle and bridges LLM tool calls into workflow and memory control

mod core;
mod paths;

pub use self::core::{CoordinatorError, CycleReport, ModuleCoordinator, OUTPUT_ERROR_FALLBACK};
pub use paths::ToolCatalogManager;
