//! Workflow validator - second-pass scoring of WORK segments
//!
//! Each WORK segment is scored against the workflow catalogue by comparing
//! its text with every workflow's readable name and description. High scores
//! (or a strong-keyword hit) boost confidence and coerce the segment's work
//! mode to the matched workflow's declared mode; very low scores cut
//! confidence and may demote the segment to CHAT.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde_json::json;
use tracing::debug;

use crate::domain::{IntentSegment, IntentType};
use crate::workflow::{WorkflowCatalog, WorkflowDefinition};

/// At or above this similarity the segment is considered matched (>=, not >)
pub const HIGH_SIMILARITY_THRESHOLD: f64 = 0.45;
/// Below this similarity confidence is penalised
pub const LOW_SIMILARITY_THRESHOLD: f64 = 0.15;
/// Penalised confidence below this demotes the segment to CHAT
pub const CHAT_DEMOTION_THRESHOLD: f64 = 0.8;

const CONFIDENCE_BOOST: f64 = 1.15;
const CONFIDENCE_CAP: f64 = 0.999;
const CONFIDENCE_PENALTY: f64 = 0.7;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "for", "to", "with", "using", "in", "on", "at", "by", "from", "of", "and", "or", "but",
        "is", "are", "was", "were", "this", "that", "these", "those", "my", "your", "me", "you", "it", "some",
        "please",
    ]
    .into_iter()
    .collect()
});

static SYNONYMS: LazyLock<HashMap<&'static str, HashSet<&'static str>>> = LazyLock::new(|| {
    let table: [(&str, &[&str]); 30] = [
        ("music", &["media", "audio", "song", "playback", "play"]),
        ("media", &["music", "audio", "video", "playback"]),
        ("play", &["playback", "start", "run", "music", "media"]),
        ("playback", &["play", "music", "media"]),
        ("file", &["document", "doc"]),
        ("document", &["file", "doc"]),
        ("archive", &["save", "store", "backup"]),
        ("time", &["clock", "hour", "minute", "world", "get"]),
        ("clock", &["time"]),
        ("world", &["time", "global", "international"]),
        ("get", &["show", "display", "check", "time", "weather"]),
        ("weather", &["forecast", "temperature", "climate", "get", "check", "show"]),
        ("forecast", &["weather", "temperature", "climate"]),
        ("temperature", &["weather", "forecast", "climate"]),
        ("climate", &["weather", "forecast", "temperature"]),
        ("tell", &["show", "display", "get", "check"]),
        ("about", &["regarding", "concerning"]),
        ("translate", &["translation", "convert", "document"]),
        ("clean", &["clear", "remove", "delete"]),
        ("trash", &["bin", "recycle", "garbage", "clean"]),
        ("bin", &["trash", "recycle", "clean"]),
        ("script", &["code", "program", "file"]),
        ("backup", &["archive", "save", "generate"]),
        ("generate", &["create", "make", "backup"]),
        ("library", &["music", "media", "collection"]),
        ("news", &["headlines", "summary", "articles", "latest", "show"]),
        ("headlines", &["news", "summary", "latest"]),
        ("summary", &["news", "headlines", "summarize"]),
        ("show", &["display", "get", "check", "news", "tell"]),
        ("check", &["show", "display", "get", "weather", "tell"]),
    ];
    table
        .into_iter()
        .map(|(word, synonyms)| (word, synonyms.iter().copied().collect()))
        .collect()
});

static STRONG_KEYWORDS: LazyLock<HashMap<&'static str, HashSet<&'static str>>> = LazyLock::new(|| {
    let table: [(&str, &[&str]); 10] = [
        ("get_weather", &["weather", "forecast", "temperature", "climate"]),
        ("news_summary", &["news", "headlines", "articles"]),
        ("translate_document", &["translate", "translation"]),
        ("get_world_time", &["time", "clock", "timezone"]),
        ("drop_and_read", &["read", "file", "document", "drop"]),
        ("summarize_and_tag", &["summarize", "summary", "tag", "tags"]),
        ("clipboard_tracker", &["clipboard", "history", "copy"]),
        ("clean_trash_bin", &["trash", "bin", "clean", "garbage"]),
        ("code_analysis", &["code", "analysis", "analyze", "quality"]),
        ("ocr_image", &["ocr", "image", "recognize", "text"]),
    ];
    table
        .into_iter()
        .map(|(workflow, keywords)| (workflow, keywords.iter().copied().collect()))
        .collect()
});

pub struct WorkflowValidator {
    catalog: WorkflowCatalog,
}

impl WorkflowValidator {
    pub fn new(catalog: WorkflowCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Validate a segment list in place
    ///
    /// Non-WORK segments pass through untouched.
    pub fn validate(&self, segments: &mut [IntentSegment]) {
        if self.catalog.is_empty() {
            debug!("no workflow definitions, skipping validation");
            return;
        }
        for segment in segments {
            if segment.intent_type == IntentType::Work {
                self.validate_work_segment(segment);
            }
        }
    }

    /// Best-matching workflow for a raw text, with its similarity score
    ///
    /// Used by the chat-interrupt path, which must recognise explicit
    /// commands in full utterances without going through the tagger.
    pub fn best_match(&self, text: &str) -> Option<(&WorkflowDefinition, f64)> {
        let lowered = text.to_lowercase();
        let mut best: Option<(&WorkflowDefinition, f64)> = None;
        for workflow in self.catalog.iter() {
            let name_similarity = similarity(&lowered, &workflow.readable_name());
            let desc_similarity = similarity(&lowered, &workflow.description.to_lowercase());
            let score = name_similarity.max(desc_similarity);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((workflow, score));
            }
        }
        best
    }

    /// Whether the text matches a workflow strongly enough to act on
    pub fn is_confident_match(&self, text: &str) -> Option<&WorkflowDefinition> {
        let (workflow, score) = self.best_match(text)?;
        if score >= HIGH_SIMILARITY_THRESHOLD || has_strong_keyword(text, &workflow.name) {
            Some(workflow)
        } else {
            None
        }
    }

    fn validate_work_segment(&self, segment: &mut IntentSegment) {
        let Some((workflow, score)) = self.best_match(&segment.segment_text) else {
            return;
        };
        debug!(
            text = %segment.segment_text,
            workflow = %workflow.name,
            score,
            "work segment scored"
        );

        let original_confidence = segment.confidence;
        let strong_keyword = has_strong_keyword(&segment.segment_text, &workflow.name);

        if branch_for(score, strong_keyword) == Branch::High {
            segment.confidence = (original_confidence * CONFIDENCE_BOOST).min(CONFIDENCE_CAP);
            let original_mode = segment.work_mode();
            segment.set_meta("work_mode", json!(workflow.work_mode.as_str()));
            segment.set_meta("matched_workflow", json!(workflow.name));
            if original_mode != Some(workflow.work_mode) {
                segment.set_meta("workflow_mode_corrected", json!(true));
            }
            debug!(
                workflow = %workflow.name,
                strong_keyword,
                confidence = segment.confidence,
                "work segment matched"
            );
        } else if branch_for(score, strong_keyword) == Branch::Low {
            segment.confidence = original_confidence * CONFIDENCE_PENALTY;
            if segment.confidence < CHAT_DEMOTION_THRESHOLD {
                segment.intent_type = IntentType::Chat;
                segment.set_meta("degraded_from_work", json!(true));
                segment.set_meta("original_intent", json!("work"));
                segment.set_meta("degradation_reason", json!("no_matching_workflow"));
                debug!(confidence = segment.confidence, "work segment demoted to chat");
            }
        } else {
            segment.set_meta("potential_workflow", json!(workflow.name));
            segment.set_meta("similarity", json!((score * 1000.0).round() / 1000.0));
        }

        segment.priority = segment.derive_priority();
    }
}

/// Which validation branch a score lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    High,
    Mid,
    Low,
}

fn branch_for(score: f64, strong_keyword: bool) -> Branch {
    if score >= HIGH_SIMILARITY_THRESHOLD || strong_keyword {
        Branch::High
    } else if score < LOW_SIMILARITY_THRESHOLD {
        Branch::Low
    } else {
        Branch::Mid
    }
}

fn content_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// Keyword/synonym similarity with coverage weighting
///
/// Coverage = matched input words / total input words; coverage >= 0.5 earns
/// a bonus of min(matches * 0.1, 0.3), lower coverage is discounted by 0.8.
pub fn similarity(text1: &str, text2: &str) -> f64 {
    let words1 = content_words(text1);
    let words2 = content_words(text2);
    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }

    let direct: usize = words1.intersection(&words2).count();
    let synonym: usize = words1
        .iter()
        .filter(|w1| !words2.contains(*w1))
        .filter(|w1| {
            SYNONYMS
                .get(w1.as_str())
                .map(|syns| words2.iter().any(|w2| syns.contains(w2.as_str())))
                .unwrap_or(false)
        })
        .count();

    let total_matches = direct + synonym;
    let coverage = total_matches as f64 / words1.len() as f64;

    if coverage >= 0.5 {
        (coverage + (total_matches as f64 * 0.1).min(0.3)).min(1.0)
    } else {
        coverage * 0.8
    }
}

fn has_strong_keyword(text: &str, workflow_name: &str) -> bool {
    let Some(keywords) = STRONG_KEYWORDS.get(workflow_name) else {
        return false;
    };
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .any(|w| keywords.contains(w.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> WorkflowValidator {
        WorkflowValidator::new(WorkflowCatalog::builtin())
    }

    fn work_segment(text: &str, confidence: f64) -> IntentSegment {
        IntentSegment::new(text, IntentType::Work, confidence)
    }

    #[test]
    fn test_strong_keyword_match_boosts_and_tags() {
        let mut segments = vec![work_segment("check the weather in Taipei", 0.8)];
        validator().validate(&mut segments);

        let segment = &segments[0];
        assert_eq!(segment.intent_type, IntentType::Work);
        assert_eq!(segment.meta_str("matched_workflow"), Some("get_weather"));
        assert!((segment.confidence - 0.92).abs() < 1e-9);
        assert_eq!(segment.work_mode(), Some(crate::domain::WorkMode::Direct));
        assert_eq!(segment.priority, 100);
    }

    #[test]
    fn test_background_workflow_coerces_mode() {
        let mut segments = vec![work_segment("clean the trash bin", 0.85)];
        validator().validate(&mut segments);

        let segment = &segments[0];
        assert_eq!(segment.meta_str("matched_workflow"), Some("clean_trash_bin"));
        assert_eq!(segment.work_mode(), Some(crate::domain::WorkMode::Background));
        assert!(segment.meta_bool("workflow_mode_corrected"));
        assert_eq!(segment.priority, 30);
    }

    #[test]
    fn test_unmatched_work_demotes_to_chat() {
        let mut segments = vec![work_segment("paint my fence purple tomorrow", 0.85)];
        validator().validate(&mut segments);

        let segment = &segments[0];
        assert_eq!(segment.intent_type, IntentType::Chat);
        assert!(segment.meta_bool("degraded_from_work"));
        assert_eq!(segment.meta_str("original_intent"), Some("work"));
        assert_eq!(segment.meta_str("degradation_reason"), Some("no_matching_workflow"));
        assert!((segment.confidence - 0.595).abs() < 1e-9);
    }

    #[test]
    fn test_penalised_but_confident_stays_work() {
        // 0.999 * 0.7 = 0.6993 < 0.8 would demote; pick a confidence high
        // enough that the penalty leaves it above the CHAT threshold
        let mut segments = vec![work_segment("paint my fence purple tomorrow", 0.85)];
        segments[0].confidence = 1.2; // out-of-band to force the branch
        validator().validate(&mut segments);
        assert_eq!(segments[0].intent_type, IntentType::Work);
        assert!((segments[0].confidence - 0.84).abs() < 1e-9);
    }

    #[test]
    fn test_exact_high_threshold_takes_high_branch() {
        // The branch condition is >=, not >
        assert_eq!(branch_for(HIGH_SIMILARITY_THRESHOLD, false), Branch::High);
        assert_eq!(branch_for(HIGH_SIMILARITY_THRESHOLD - 1e-9, false), Branch::Mid);
        assert_eq!(branch_for(LOW_SIMILARITY_THRESHOLD, false), Branch::Mid);
        assert_eq!(branch_for(LOW_SIMILARITY_THRESHOLD - 1e-9, false), Branch::Low);
        // A strong keyword short-circuits to the high branch at any score
        assert_eq!(branch_for(0.0, true), Branch::High);
    }

    #[test]
    fn test_similarity_coverage_bonus() {
        // All input words match: coverage 1.0 plus bonus, capped at 1.0
        let score = similarity("weather forecast", "weather forecast temperature");
        assert!(score >= 1.0 - 1e-9);

        // Low coverage gets discounted
        let score = similarity("weather and seven unrelated words here today", "weather forecast");
        assert!(score < 0.5);
    }

    #[test]
    fn test_similarity_uses_synonyms() {
        // "tell" is a synonym of "show"/"get"/"check"
        let with_synonym = similarity("tell weather", "check the weather");
        let without = similarity("purple weather", "check the weather");
        assert!(with_synonym > without);
    }

    #[test]
    fn test_similarity_empty_inputs() {
        assert_eq!(similarity("", "check the weather"), 0.0);
        assert_eq!(similarity("the a an", "check the weather"), 0.0);
    }

    #[test]
    fn test_best_match_full_utterance() {
        let validator = validator();
        let workflow = validator
            .is_confident_match("Can you tell me about the weather in Taipei?")
            .unwrap();
        assert_eq!(workflow.name, "get_weather");
    }

    #[test]
    fn test_non_work_segments_untouched() {
        let mut segments = vec![IntentSegment::new("I love tea", IntentType::Chat, 0.85)];
        let before = segments[0].clone();
        validator().validate(&mut segments);
        assert_eq!(segments[0].confidence, before.confidence);
        assert_eq!(segments[0].intent_type, IntentType::Chat);
        assert!(segments[0].meta_str("matched_workflow").is_none());
    }
}
