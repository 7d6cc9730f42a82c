//! TTS chunker - punctuation-aligned splitting under a character budget
//!
//! Synthesis starts before the whole response is available, so long output is
//! split into chunks. URLs, email addresses, common abbreviations, and
//! numeric punctuation are protected from being broken; sentence-final
//! punctuation (including CJK marks) keeps trailing quotes/brackets
//! attached; undersized trailing chunks are merged back up to the budget.

use std::collections::HashMap;

use regex::Regex;

const DOT_SENTINEL: char = '∯';
const COMMA_SENTINEL: char = '∮';

const SENTENCE_FINALS: [char; 7] = ['.', '!', '?', '。', '？', '！', '…'];
const SECONDARY_MARKS: [char; 6] = [',', ';', ':', '，', '；', '：'];
const CLOSERS: [char; 8] = ['"', '\'', '」', '』', '）', '》', ')', ']'];

pub struct Chunker {
    max_chars: usize,
    min_chars: usize,
    url_re: Regex,
    abbr_re: Regex,
    thousands_re: Regex,
    decimal_re: Regex,
    space_re: Regex,
}

impl Chunker {
    pub fn new(max_chars: usize, min_chars: usize) -> Self {
        Self {
            max_chars,
            min_chars,
            url_re: Regex::new(r"https?://\S+|www\.\S+|\S+@\S+\.\S+").expect("url regex"),
            abbr_re: Regex::new(r"\b(e\.g\.|i\.e\.|etc\.|vs\.|Mr\.|Mrs\.|Ms\.|Dr\.|Prof\.)").expect("abbr regex"),
            thousands_re: Regex::new(r"(\d),(\d{3})\b").expect("thousands regex"),
            decimal_re: Regex::new(r"(\d)\.(\d)").expect("decimal regex"),
            space_re: Regex::new(r"\s+").expect("space regex"),
        }
    }

    /// Split `text` into synthesis-ready chunks
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let (protected, protect_map) = self.protect(text);

        if protected.chars().count() <= self.max_chars {
            return vec![restore(&protected, &protect_map)];
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for sentence in split_after(&protected, &SENTENCE_FINALS) {
            if sentence.chars().count() > self.max_chars {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(self.split_long_sentence(&sentence));
            } else if fits(&current, &sentence, self.max_chars) {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&sentence);
            } else {
                chunks.push(std::mem::replace(&mut current, sentence));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        let merged = self.merge_small(chunks);
        merged.iter().map(|chunk| restore(chunk, &protect_map)).collect()
    }

    fn protect(&self, text: &str) -> (String, HashMap<String, String>) {
        let mut map = HashMap::new();
        let mut counter = 0usize;

        let mut out = self
            .url_re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let key = format!("<<URL{counter}>>");
                counter += 1;
                map.insert(key.clone(), caps[0].to_string());
                key
            })
            .into_owned();

        out = self
            .abbr_re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                caps[0].replace('.', &DOT_SENTINEL.to_string())
            })
            .into_owned();
        out = self
            .thousands_re
            .replace_all(&out, format!("${{1}}{COMMA_SENTINEL}${{2}}").as_str())
            .into_owned();
        out = self
            .decimal_re
            .replace_all(&out, format!("${{1}}{DOT_SENTINEL}${{2}}").as_str())
            .into_owned();
        out = self.space_re.replace_all(&out, " ").into_owned();

        (out, map)
    }

    /// An oversize sentence splits at secondary punctuation, then at words
    fn split_long_sentence(&self, sentence: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for piece in split_after(sentence, &SECONDARY_MARKS) {
            if piece.chars().count() > self.max_chars {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(self.split_at_words(&piece));
            } else if fits(&current, &piece, self.max_chars) {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn split_at_words(&self, piece: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for word in piece.split_whitespace() {
            if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Merge undersized chunks into their neighbours up to the budget
    fn merge_small(&self, chunks: Vec<String>) -> Vec<String> {
        if self.min_chars == 0 {
            return chunks;
        }
        let mut merged: Vec<String> = Vec::new();
        let mut current = String::new();
        for chunk in chunks {
            if current.is_empty() {
                current = chunk;
            } else if current.chars().count() < self.min_chars
                && current.chars().count() + chunk.chars().count() + 1 <= self.max_chars
            {
                current.push(' ');
                current.push_str(&chunk);
            } else {
                merged.push(std::mem::replace(&mut current, chunk));
            }
        }
        if !current.is_empty() {
            merged.push(current);
        }
        merged
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(150, 50)
    }
}

/// Whether `add` fits next to `current` (plus a joining space) within `max`
fn fits(current: &str, add: &str, max: usize) -> bool {
    let add_len = add.chars().count();
    if current.is_empty() {
        add_len <= max
    } else {
        current.chars().count() + add_len + 1 <= max
    }
}

/// Split after any of `marks`, keeping the mark (and any closing
/// quotes/brackets that follow it) with the left piece
///
/// Works without inter-sentence whitespace, which CJK text lacks.
fn split_after(text: &str, marks: &[char]) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if marks.contains(&c) {
            while let Some(&next) = chars.peek() {
                if CLOSERS.contains(&next) {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let piece = current.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    pieces
}

fn restore(text: &str, protect_map: &HashMap<String, String>) -> String {
    let mut out = text.replace(DOT_SENTINEL, ".").replace(COMMA_SENTINEL, ",");
    for (key, value) in protect_map {
        out = out.replace(key, value);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.split_text("A short reply.");
        assert_eq!(chunks, vec!["A short reply.".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(Chunker::default().split_text("  ").is_empty());
    }

    #[test]
    fn test_splits_at_sentence_boundaries() {
        let chunker = Chunker::new(40, 10);
        let text = "The first sentence sits right here. The second one follows it closely. And a third finishes the thought.";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "oversize chunk: {chunk}");
        }
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_url_not_broken() {
        let chunker = Chunker::new(40, 10);
        let text = "The docs live at https://example.com/a/very/long/path/indeed.html today. Read them when you can find the time.";
        let chunks = chunker.split_text(text);
        let holding: Vec<_> = chunks
            .iter()
            .filter(|c| c.contains("https://example.com/a/very/long/path/indeed.html"))
            .collect();
        // The URL survives, inside exactly one chunk
        assert_eq!(holding.len(), 1);
    }

    #[test]
    fn test_email_not_broken() {
        let chunker = Chunker::new(30, 5);
        let text = "Reach the team at support@example.com for help. They answer most days within the hour, honestly.";
        let chunks = chunker.split_text(text);
        let holding: Vec<_> = chunks.iter().filter(|c| c.contains("support@example.com")).collect();
        assert_eq!(holding.len(), 1);
    }

    #[test]
    fn test_abbreviation_dot_not_a_boundary() {
        let chunker = Chunker::new(60, 10);
        let text = "Dr. Lee arrives at noon, e.g. right after lunch ends for us. The second sentence needs enough length to force a split.";
        let chunks = chunker.split_text(text);
        assert!(chunks.iter().all(|c| !c.ends_with("Dr.")));
        assert!(chunks.join(" ").contains("e.g."));
        assert!(chunks.join(" ").contains("Dr. Lee"));
    }

    #[test]
    fn test_numeric_punctuation_preserved() {
        let chunker = Chunker::new(40, 5);
        let text = "The total comes to 1,234.56 dollars exactly. That includes the shipping fee and the tax we discussed.";
        let chunks = chunker.split_text(text);
        assert!(chunks.iter().any(|c| c.contains("1,234.56")));
    }

    #[test]
    fn test_oversize_sentence_splits_at_secondary_punctuation() {
        let chunker = Chunker::new(30, 5);
        let text = "first clause goes here, second clause goes here, third clause goes here, fourth clause goes here";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "oversize chunk: {chunk}");
        }
    }

    #[test]
    fn test_cjk_sentence_marks_without_spaces() {
        let chunker = Chunker::new(12, 2);
        let text = "今天天氣很好嗎？我們出去走走吧。然後喝杯咖啡，好不好呢？";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('？'));
    }

    #[test]
    fn test_closing_quote_stays_attached() {
        let chunker = Chunker::new(25, 5);
        let text = r#"He said "stop right now!" and then he slowly left the room without another word."#;
        let chunks = chunker.split_text(text);
        assert!(chunks.iter().any(|c| c.ends_with(r#"now!""#)));
    }

    #[test]
    fn test_small_chunks_merge() {
        let chunker = Chunker::new(60, 20);
        let text = "One. Two. Three. Four. Five. Six. Seven. Eight. Nine. Ten. Eleven. Twelve. Thirteen. Fourteen. Fifteen. Sixteen. Seventeen. Eighteen. Nineteen. Twenty.";
        let chunks = chunker.split_text(text);
        // Tiny sentences coalesce instead of one chunk per sentence
        assert!(chunks.len() <= 4);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 60);
        }
    }

    #[test]
    fn test_word_split_fallback_for_unbroken_text() {
        let chunker = Chunker::new(20, 2);
        let text = "word ".repeat(30);
        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
        }
    }
}
