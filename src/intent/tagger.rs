//! Raw intent tagging
//!
//! The trained BIO model lives in the external `nlp` module; [`BioTagger`] is
//! its seam. The shipped [`HeuristicTagger`] splits text at boundary markers
//! and classifies clauses by keyword tables, which is enough for harnesses
//! and for hosts without the model.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::domain::IntentType;

/// Connectives and punctuation treated as clause boundaries
pub const BOUNDARY_CONNECTIVES: [&str; 5] = ["and", "then", "but", "or", "so"];

/// Hard boundary punctuation: merging never crosses these
pub const HARD_BOUNDARIES: [char; 4] = ['.', '!', '?', ';'];

const SOFT_BOUNDARIES: [char; 5] = [',', '.', '!', '?', ';'];

/// Greeting tokens classified as CALL
pub static GREETING_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "hello",
        "hi",
        "hey",
        "greetings",
        "good morning",
        "good afternoon",
        "good evening",
    ]
    .into_iter()
    .collect()
});

/// Action verbs that make a clause read as a command
static WORK_ACTION_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "check", "get", "show", "display", "search", "find", "read", "write", "create", "generate", "translate",
        "analyze", "clean", "delete", "remove", "save", "archive", "backup", "copy", "summarize", "tag", "recognize",
        "extract", "play", "start", "run", "open",
    ]
    .into_iter()
    .collect()
});

/// A tagged span with positions into the original text
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub text: String,
    pub intent: IntentType,
    pub confidence: f64,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Boundary to the intent-tagging model
pub trait BioTagger: Send + Sync {
    /// Tag the text into non-overlapping segments covering it in order
    fn tag(&self, text: &str) -> Vec<RawSegment>;
}

/// Rule-based tagger: clause splitting plus keyword classification
pub struct HeuristicTagger;

impl HeuristicTagger {
    pub fn new() -> Self {
        Self
    }

    fn classify(clause: &str) -> (IntentType, f64) {
        let lowered = clause.to_lowercase();
        let stripped = lowered.trim().trim_matches(|c: char| !c.is_alphanumeric());
        if GREETING_KEYWORDS.contains(stripped) {
            return (IntentType::Call, 0.95);
        }
        let words: Vec<&str> = stripped
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .collect();
        if words.iter().any(|w| WORK_ACTION_KEYWORDS.contains(w)) {
            (IntentType::Work, 0.9)
        } else {
            (IntentType::Chat, 0.85)
        }
    }
}

impl Default for HeuristicTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl BioTagger for HeuristicTagger {
    fn tag(&self, text: &str) -> Vec<RawSegment> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Split into clauses at punctuation and connective words, keeping
        // byte positions so the post-processor can inspect boundary text
        let mut segments = Vec::new();
        let mut clause_start = 0usize;
        let mut cursor = 0usize;

        let mut flush = |start: usize, end: usize, segments: &mut Vec<RawSegment>| {
            let clause = &text[start..end];
            let trimmed = clause.trim();
            if trimmed.is_empty() {
                return;
            }
            let leading = clause.len() - clause.trim_start().len();
            let trailing = clause.len() - clause.trim_end().len();
            let (intent, confidence) = Self::classify(trimmed);
            segments.push(RawSegment {
                text: trimmed.to_string(),
                intent,
                confidence,
                start_pos: start + leading,
                end_pos: end - trailing,
            });
        };

        for token in text.split_inclusive(|c: char| SOFT_BOUNDARIES.contains(&c) || c.is_whitespace()) {
            let token_start = cursor;
            cursor += token.len();

            let word = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            let ends_with_punct = token
                .trim_end()
                .chars()
                .last()
                .map(|c| SOFT_BOUNDARIES.contains(&c))
                .unwrap_or(false);

            if BOUNDARY_CONNECTIVES.contains(&word.as_str()) {
                flush(clause_start, token_start, &mut segments);
                clause_start = cursor;
            } else if ends_with_punct {
                flush(clause_start, cursor, &mut segments);
                clause_start = cursor;
            }
        }
        flush(clause_start, text.len(), &mut segments);
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert!(HeuristicTagger::new().tag("").is_empty());
        assert!(HeuristicTagger::new().tag("   ").is_empty());
    }

    #[test]
    fn test_greeting_then_question() {
        let segments = HeuristicTagger::new().tag("Hello! Can you tell me what time it is?");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].intent, IntentType::Call);
        assert_eq!(segments[0].text, "Hello!");
        // "tell" is not an action keyword, so the question reads as chat
        assert_eq!(segments[1].intent, IntentType::Chat);
    }

    #[test]
    fn test_command_then_chat_split_on_connective() {
        let segments = HeuristicTagger::new().tag("Check the weather in Taipei and then let's talk about it");
        let intents: Vec<IntentType> = segments.iter().map(|s| s.intent).collect();
        assert!(intents.contains(&IntentType::Work));
        assert!(intents.contains(&IntentType::Chat));
        assert_eq!(segments[0].intent, IntentType::Work);
        assert!(segments[0].text.to_lowercase().contains("weather"));
    }

    #[test]
    fn test_segments_cover_without_overlap() {
        let text = "Read this file, and summarize it. Thanks a lot!";
        let segments = HeuristicTagger::new().tag(text);
        for pair in segments.windows(2) {
            assert!(pair[0].end_pos <= pair[1].start_pos);
        }
        for segment in &segments {
            assert_eq!(&text[segment.start_pos..segment.end_pos], segment.text);
        }
    }

    #[test]
    fn test_plain_statement_is_chat() {
        let segments = HeuristicTagger::new().tag("I love coffee in the morning");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].intent, IntentType::Chat);
    }
}
