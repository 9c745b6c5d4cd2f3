//! Prompt tokenization shared by the router, learner, and predictor.

use std::collections::BTreeSet;

/// All prompt tokens: lowercased, split on non-alphanumerics, empties
/// dropped.  Keyword matching works over this set so short identifiers
/// ("db", "ui") still match.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Common English stop words excluded from the learned-association term set.
/// Filtering these keeps high-frequency words from accumulating spurious
/// prompt→file strength.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "was", "has", "are", "not", "this", "that",
    "with", "from", "have", "you", "can", "its", "will", "but", "they",
    "all", "been", "also", "into", "more", "than", "when", "who", "what",
    "how", "out", "our", "new", "now", "please", "fix", "add", "make",
];

/// Tokens worth learning associations for: at least three chars, not a stop
/// word.
pub fn salient_tokens(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= 3)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}
