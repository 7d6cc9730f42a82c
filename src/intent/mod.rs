//! Intent segmentation: raw tagging, post-processing, workflow validation
//!
//! The segmenter runs in the input layer, independent of the reasoning
//! module. Raw per-token tagging is a module boundary ([`BioTagger`]); the
//! post-processor and workflow validator are core logic.

mod postprocess;
mod segmenter;
mod tagger;
mod validator;

pub use segmenter::IntentSegmenter;
pub use tagger::{BioTagger, HeuristicTagger, RawSegment};
pub use validator::{
    CHAT_DEMOTION_THRESHOLD, HIGH_SIMILARITY_THRESHOLD, LOW_SIMILARITY_THRESHOLD, WorkflowValidator,
};
