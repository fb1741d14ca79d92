//! Keyword matcher for memory search: tokenizer plus entry-vs-query match.
//!
//! ASCII runs become whole tokens; runs containing CJK emit overlapping
//! bigrams so two-character Chinese words are findable without segmentation.

use crate::memory::entry::MemoryEntry;

/// Exact-match stopwords dropped after tokenization.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "in", "on", "to", "for", "with", "is", "are", "am", "be",
];

/// Splits a query into lowercase search tokens.
///
/// Rules, in order: lowercase; split into maximal runs of
/// non-whitespace/non-punctuation characters; a run containing any CJK code
/// point emits its overlapping bigrams, otherwise the run is one token; drop
/// tokens shorter than 2 chars; drop stopwords; dedupe keeping first
/// occurrence. A run mixing ASCII and CJK bigrams across the script boundary.
pub fn tokenize(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut tokens: Vec<String> = Vec::new();

    for run in lowered
        .split(|c: char| c.is_whitespace() || is_punctuation(c))
        .filter(|run| !run.is_empty())
    {
        if run.chars().any(is_cjk) {
            let chars: Vec<char> = run.chars().collect();
            for pair in chars.windows(2) {
                tokens.push(pair.iter().collect());
            }
        } else {
            tokens.push(run.to_string());
        }
    }

    let mut seen = std::collections::HashSet::new();
    tokens
        .into_iter()
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// True when the entry's text or any topic contains a search token.
///
/// With no tokens, the raw trimmed query is used as a fallback substring
/// match; an empty trimmed query never matches.
pub fn entry_matches(entry: &MemoryEntry, query: &str) -> bool {
    let tokens = tokenize(query);
    let text = entry.memory.text.to_lowercase();
    let topics: Vec<String> = entry
        .memory
        .topics
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    if tokens.is_empty() {
        let trimmed = query.trim().to_lowercase();
        if trimmed.is_empty() {
            return false;
        }
        return text.contains(&trimmed) || topics.iter().any(|t| t.contains(&trimmed));
    }

    tokens
        .iter()
        .any(|token| text.contains(token) || topics.iter().any(|t| t.contains(token)))
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '\u{3000}'..='\u{303F}' | '\u{FF00}'..='\u{FF0F}' | '\u{FF1A}'..='\u{FF20}' | '\u{FF3B}'..='\u{FF40}' | '\u{FF5B}'..='\u{FF65}')
}

/// CJK code points: Han (unified, extension A, compatibility), kana, Hangul.
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}
