//! Text cleaning, normalization and keyword extraction.
//!
//! Everything here is a pure function over its input; [`Preprocessor`] holds
//! no state and exists only to group the transforms.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Words that carry no topical meaning in commit messages and comments.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "also", "am", "among", "an", "and", "any", "are", "as",
    "at", "be", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "during", "each", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "may", "might", "more",
    "most", "must", "no", "not", "now", "of", "on", "only", "or", "our", "out", "over", "shall",
    "she", "should", "so", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "why", "will",
    "with", "would", "you", "your",
];

/// Minimum token length kept by [`Preprocessor::keywords`].
pub const MIN_KEYWORD_LEN: usize = 3;

static STOP_WORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static LEADING_TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:merge|revert)\s*:\s*").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?|ftp)://\S+|\bwww\.\S+").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static ISSUE_PHRASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:fix(?:es|ed)?|close[sd]?|resolve[sd]?|refs?|see)\s+(?:[\w.-]+/[\w.-]+)?#\d+\b",
    )
    .unwrap()
});

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static ISSUE_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b[\w.-]+/[\w.-]+)?#\d+\b|\bGH-\d+\b").unwrap()
});

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static EMPTY_BRACKETS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*\)|\[\s*\]").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static WHITESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static INNER_APOSTROPHE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)['’](\w)").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static NON_WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]+").unwrap());

/// Stateless text transforms applied before classification.
pub struct Preprocessor;

impl Preprocessor {
    /// Strips URLs, issue references and leading `Merge:`/`Revert:` tags, then
    /// collapses whitespace.
    pub fn clean(message: &str) -> String {
        let text = LEADING_TAG_PATTERN.replace(message, "");
        let text = URL_PATTERN.replace_all(&text, " ");
        let text = ISSUE_PHRASE_PATTERN.replace_all(&text, " ");
        let text = ISSUE_REFERENCE_PATTERN.replace_all(&text, " ");
        let text = EMPTY_BRACKETS_PATTERN.replace_all(&text, " ");
        collapse_whitespace(&text)
    }

    /// Lowercases and replaces punctuation with word boundaries.
    ///
    /// Apostrophes inside words are dropped (`don't` → `dont`); every other
    /// run of punctuation becomes a single space.
    pub fn normalize(text: &str) -> String {
        let lower = text.to_lowercase();
        let joined = INNER_APOSTROPHE_PATTERN.replace_all(&lower, "$1$2");
        let spaced = NON_WORD_PATTERN.replace_all(&joined, " ");
        collapse_whitespace(&spaced)
    }

    /// Ranks content words by frequency, ties broken by first occurrence.
    pub fn keywords(text: &str) -> Vec<String> {
        let normalized = Self::normalize(text);

        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, token) in normalized
            .split_whitespace()
            .filter(|t| is_keyword_candidate(t))
            .enumerate()
        {
            counts.entry(token).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .map(|(token, (count, first))| (token, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ranked
            .into_iter()
            .map(|(token, _, _)| token.to_string())
            .collect()
    }

    /// Returns at most `n` keywords from [`Self::keywords`].
    pub fn top_keywords(text: &str, n: usize) -> Vec<String> {
        let mut keywords = Self::keywords(text);
        keywords.truncate(n);
        keywords
    }

    /// Returns true when the text contains at least one letter or digit.
    pub fn has_word_content(text: &str) -> bool {
        text.chars().any(char::is_alphanumeric)
    }
}

fn is_keyword_candidate(token: &str) -> bool {
    token.chars().count() >= MIN_KEYWORD_LEN
        && !token.chars().all(|c| c.is_ascii_digit())
        && !STOP_WORD_SET.contains(token)
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_PATTERN.replace_all(text, " ").trim().to_string()
}
