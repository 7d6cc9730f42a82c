//! IntentSegmenter - the full input-side pipeline
//!
//! tag -> post-process -> validate -> prioritised [`IntentSegment`] list,
//! ready for `StateQueue::process_nlp_intents`.

use serde_json::json;
use tracing::debug;

use crate::domain::{IntentSegment, IntentType};

use super::postprocess;
use super::tagger::BioTagger;
use super::validator::WorkflowValidator;

pub struct IntentSegmenter {
    tagger: Box<dyn BioTagger>,
    validator: WorkflowValidator,
}

impl IntentSegmenter {
    pub fn new(tagger: Box<dyn BioTagger>, validator: WorkflowValidator) -> Self {
        Self { tagger, validator }
    }

    pub fn validator(&self) -> &WorkflowValidator {
        &self.validator
    }

    /// Segment raw text into prioritised intent segments
    ///
    /// Empty text yields an empty list. The output covers the input without
    /// overlap; WORK segments carry validator provenance in their metadata.
    pub fn segment(&self, text: &str) -> Vec<IntentSegment> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let raw = self.tagger.tag(text);
        let processed = postprocess::process(raw, text);
        debug!(raw = processed.len(), "segments after post-processing");

        let mut segments: Vec<IntentSegment> = processed
            .into_iter()
            .map(|raw| {
                let mut segment = IntentSegment::new(raw.text, raw.intent, raw.confidence);
                segment.set_meta("start_pos", json!(raw.start_pos));
                segment.set_meta("end_pos", json!(raw.end_pos));
                segment
            })
            .collect();

        self.validator.validate(&mut segments);
        for segment in &mut segments {
            segment.priority = segment.derive_priority();
        }
        segments
    }
}
