//! Post-processing of raw tagged segments: short-segment handling and merging

use std::collections::HashMap;

use tracing::debug;

use crate::domain::IntentType;

use super::tagger::{GREETING_KEYWORDS, HARD_BOUNDARIES, RawSegment};

/// Post-process raw segments: short-segment reclassification, then merging
///
/// Idempotent: processing an already-processed list changes nothing.
pub fn process(raw_segments: Vec<RawSegment>, original_text: &str) -> Vec<RawSegment> {
    if raw_segments.is_empty() {
        return raw_segments;
    }
    let segments = handle_short_segments(raw_segments);
    merge_segments(segments, original_text)
}

/// Segments shorter than three characters become CALL (known greeting) or
/// UNKNOWN (merge fodder)
fn handle_short_segments(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    segments
        .into_iter()
        .map(|mut segment| {
            let trimmed = segment.text.trim();
            if trimmed.len() < 3 {
                let lowered = trimmed.to_lowercase();
                if GREETING_KEYWORDS.contains(lowered.as_str()) {
                    debug!(text = %trimmed, "short segment is a greeting -> CALL");
                    segment.intent = IntentType::Call;
                } else {
                    debug!(text = %trimmed, "short segment -> UNKNOWN");
                    segment.intent = IntentType::Unknown;
                }
            }
            segment
        })
        .collect()
}

/// Merge adjacent segments
///
/// Rules: equal intents merge; an UNKNOWN next segment merges (likely a
/// connective); a group already holding several intents keeps absorbing; a
/// hard punctuation boundary between segments stops any merge. The merged
/// segment takes the dominant intent (most frequent, ties to first
/// appearance) and the average confidence.
fn merge_segments(segments: Vec<RawSegment>, original_text: &str) -> Vec<RawSegment> {
    if segments.len() <= 1 {
        return segments;
    }

    let mut merged = Vec::new();
    let mut i = 0;
    while i < segments.len() {
        let mut group = vec![segments[i].clone()];
        let mut j = i + 1;
        while j < segments.len() {
            if !should_merge(&group, &segments[j], original_text) {
                break;
            }
            group.push(segments[j].clone());
            j += 1;
        }

        if group.len() > 1 {
            let combined = create_merged_segment(&group, original_text);
            debug!(
                merged = group.len(),
                intent = combined.intent.as_str(),
                text = %combined.text,
                "segments merged"
            );
            merged.push(combined);
        } else {
            merged.push(group.into_iter().next().unwrap());
        }
        i = j;
    }
    merged
}

fn should_merge(group: &[RawSegment], next: &RawSegment, original_text: &str) -> bool {
    let last = group.last().unwrap();

    // A hard punctuation boundary stops any merge, whether the mark sits
    // between the segments or at the tail of the previous one
    if last
        .text
        .trim_end()
        .chars()
        .last()
        .map(|c| HARD_BOUNDARIES.contains(&c))
        .unwrap_or(false)
    {
        return false;
    }
    if last.end_pos < next.start_pos {
        let between = original_text[last.end_pos..next.start_pos].trim();
        if !between.is_empty() && between.chars().all(|c| HARD_BOUNDARIES.contains(&c)) {
            return false;
        }
    }

    if last.intent == next.intent {
        return true;
    }
    if next.intent == IntentType::Unknown {
        return true;
    }

    // A group already spanning several intents keeps absorbing; the dominant
    // intent is decided at the end
    let mut intents: Vec<IntentType> = group.iter().map(|s| s.intent).collect();
    intents.dedup();
    intents.len() > 1
}

fn create_merged_segment(group: &[RawSegment], original_text: &str) -> RawSegment {
    let mut counts: HashMap<IntentType, usize> = HashMap::new();
    let mut first_seen: HashMap<IntentType, usize> = HashMap::new();
    for (index, segment) in group.iter().enumerate() {
        *counts.entry(segment.intent).or_insert(0) += 1;
        first_seen.entry(segment.intent).or_insert(index);
    }

    let max_count = counts.values().copied().max().unwrap_or(0);
    let dominant = counts
        .iter()
        .filter(|(_, count)| **count == max_count)
        .map(|(intent, _)| *intent)
        .min_by_key(|intent| first_seen[intent])
        .unwrap();

    let avg_confidence = group.iter().map(|s| s.confidence).sum::<f64>() / group.len() as f64;
    let start_pos = group.first().unwrap().start_pos;
    let end_pos = group.last().unwrap().end_pos;

    RawSegment {
        text: original_text[start_pos..end_pos].to_string(),
        intent: dominant,
        confidence: (avg_confidence * 1000.0).round() / 1000.0,
        start_pos,
        end_pos,
    }
}
