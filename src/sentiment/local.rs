//! Offline lexicon sentiment model.
//!
//! Scores are computed from word valences with negation and intensifier
//! handling, so the same input and lexicon always give the same score.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{
    ClassifierError, ClassifierFuture, ClassifierMetadata, SentimentClassifier, SentimentLabel,
    SentimentScore,
};
use crate::config::ClassifierBackend;
use crate::preprocess::Preprocessor;

/// The embedded lexicon.
pub const LEXICON_YAML: &str = include_str!("../templates/lexicon.yaml");

/// Name of the embedded model.
pub const DEFAULT_MODEL: &str = "codemood-lexicon-v1";

/// Compound score at or above which text is positive.
pub const POSITIVE_THRESHOLD: f64 = 0.05;

/// Compound score at or below which text is negative.
pub const NEGATIVE_THRESHOLD: f64 = -0.05;

/// Normalization constant: compound = sum / sqrt(sum² + ALPHA).
const ALPHA: f64 = 15.0;

/// Scale applied to a valence under negation.
const NEGATION_SCALAR: f64 = -0.74;

/// How many preceding tokens may negate or intensify a word.
const LOOKBACK: usize = 3;

/// Emphasis added per exclamation mark, up to [`MAX_EXCLAMATIONS`].
const EXCLAMATION_BOOST: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;

/// Concurrent scoring tasks suggested for the local backend.
const LOCAL_CONCURRENCY: usize = 8;

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// Lexicon file format.
#[derive(Debug, Deserialize)]
pub struct LexiconFile {
    /// Model name reported in metadata.
    pub model: String,
    /// Lexicon revision.
    pub version: u32,
    /// Longest input scored without truncation, in whitespace tokens.
    pub max_input_tokens: usize,
    /// Words that flip the polarity of what follows.
    #[serde(default)]
    pub negators: Vec<String>,
    /// Words that strengthen (positive) or soften (negative) what follows.
    #[serde(default)]
    pub intensifiers: HashMap<String, f64>,
    /// Word valences in `[-4, 4]`.
    pub valences: HashMap<String, f64>,
}

/// Deterministic lexicon classifier.
#[derive(Debug)]
pub struct LexiconClassifier {
    model: String,
    max_input_tokens: usize,
    negators: HashSet<String>,
    intensifiers: HashMap<String, f64>,
    valences: HashMap<String, f64>,
}

impl LexiconClassifier {
    /// Loads the embedded lexicon.
    pub fn embedded() -> Result<Self, ClassifierError> {
        Self::from_yaml(LEXICON_YAML)
    }

    /// Loads the embedded model by name, or a lexicon file by path.
    pub fn from_model_name(name: &str) -> Result<Self, ClassifierError> {
        if name == DEFAULT_MODEL {
            return Self::embedded();
        }

        let path = Path::new(name);
        let content = fs::read_to_string(path).map_err(|e| {
            ClassifierError::ClassifierUnavailable(format!(
                "cannot load lexicon model {name}: {e}"
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a lexicon from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ClassifierError> {
        let file: LexiconFile = serde_yaml::from_str(yaml).map_err(|e| {
            ClassifierError::ClassifierUnavailable(format!("invalid lexicon: {e}"))
        })?;
        if file.max_input_tokens == 0 {
            return Err(ClassifierError::ClassifierUnavailable(
                "invalid lexicon: max_input_tokens must be positive".to_string(),
            ));
        }

        debug!(
            model = %file.model,
            version = file.version,
            words = file.valences.len(),
            "Loaded sentiment lexicon"
        );

        Ok(Self {
            model: file.model,
            max_input_tokens: file.max_input_tokens,
            negators: file.negators.into_iter().collect(),
            intensifiers: file.intensifiers,
            valences: file.valences,
        })
    }

    /// Normalized compound score in `(-1, 1)`.
    pub fn compound(&self, text: &str) -> f64 {
        let text = truncate_at_token_boundary(text, self.max_input_tokens);
        let tokens = tokenize(text);

        let mut sum = 0.0;
        for (i, token) in tokens.iter().enumerate() {
            let Some(&valence) = self.valences.get(token.as_str()) else {
                continue;
            };
            sum += self.adjusted_valence(valence, &tokens[i.saturating_sub(LOOKBACK)..i]);
        }

        if sum != 0.0 {
            let exclamations = text.matches('!').count().min(MAX_EXCLAMATIONS);
            sum += sum.signum() * EXCLAMATION_BOOST * exclamations as f64;
        }

        sum / (sum * sum + ALPHA).sqrt()
    }

    /// Applies intensifiers and negation found in the words before a match.
    fn adjusted_valence(&self, valence: f64, preceding: &[String]) -> f64 {
        let mut adjusted = valence;
        for (distance, word) in preceding.iter().rev().enumerate() {
            if let Some(&boost) = self.intensifiers.get(word.as_str()) {
                // Further intensifiers count for less.
                let decay = 1.0 - 0.05 * distance as f64;
                adjusted += valence.signum() * boost * decay;
            }
        }
        if preceding.iter().any(|word| self.negators.contains(word.as_str())) {
            adjusted *= NEGATION_SCALAR;
        }
        adjusted
    }

    /// Maps a compound score to a label and a confidence in `[0.5, 1.0]`.
    pub fn score_text(&self, text: &str) -> SentimentScore {
        let compound = self.compound(text);
        let (label, confidence) = if compound >= POSITIVE_THRESHOLD {
            (SentimentLabel::Positive, 0.5 + 0.5 * compound)
        } else if compound <= NEGATIVE_THRESHOLD {
            (SentimentLabel::Negative, 0.5 - 0.5 * compound)
        } else {
            (
                SentimentLabel::Neutral,
                1.0 - 0.5 * compound.abs() / POSITIVE_THRESHOLD,
            )
        };
        SentimentScore::new(label, confidence)
    }
}

impl SentimentClassifier for LexiconClassifier {
    fn score<'a>(&'a self, text: &'a str) -> ClassifierFuture<'a, SentimentScore> {
        Box::pin(async move { Ok(self.score_text(text)) })
    }

    fn metadata(&self) -> ClassifierMetadata {
        ClassifierMetadata {
            backend: ClassifierBackend::Local,
            model: self.model.clone(),
            max_input_tokens: self.max_input_tokens,
            recommended_concurrency: LOCAL_CONCURRENCY,
        }
    }
}

/// Returns the prefix of `text` holding at most `max_tokens` whitespace tokens.
///
/// The cut always falls at the end of a token, never inside one.
pub fn truncate_at_token_boundary(text: &str, max_tokens: usize) -> &str {
    let mut seen = 0;
    let mut in_token = false;
    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_token {
                in_token = false;
                if seen == max_tokens {
                    return &text[..index];
                }
            }
        } else if !in_token {
            if seen == max_tokens {
                return text[..index].trim_end();
            }
            in_token = true;
            seen += 1;
        }
    }
    text
}

/// Splits identifiers and prose into lowercase words.
fn tokenize(text: &str) -> Vec<String> {
    let split = CAMEL_BOUNDARY.replace_all(text, "$1 $2");
    Preprocessor::normalize(&split)
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn classifier() -> LexiconClassifier {
        LexiconClassifier::embedded().unwrap()
    }

    #[test]
    fn embedded_lexicon_loads() {
        let classifier = classifier();
        let metadata = classifier.metadata();
        assert_eq!(metadata.model, DEFAULT_MODEL);
        assert_eq!(metadata.backend, ClassifierBackend::Local);
        assert!(metadata.max_input_tokens > 0);
    }

    #[test]
    fn clear_polarities() {
        let classifier = classifier();
        assert_eq!(classifier.score_text("great work").label, SentimentLabel::Positive);
        assert_eq!(classifier.score_text("terrible bug").label, SentimentLabel::Negative);
        assert_eq!(classifier.score_text("refactor module").label, SentimentLabel::Neutral);
    }

    #[test]
    fn crash_vocabulary_is_never_positive() {
        let score = classifier().score_text("Fixed critical crash in parser!!");
        assert_ne!(score.label, SentimentLabel::Positive);
    }

    #[test]
    fn negation_flips_polarity() {
        let classifier = classifier();
        assert_eq!(classifier.score_text("this is good").label, SentimentLabel::Positive);
        assert_eq!(
            classifier.score_text("this is not good").label,
            SentimentLabel::Negative
        );
        assert_eq!(classifier.score_text("don't break").label, SentimentLabel::Neutral);
    }

    #[test]
    fn intensifiers_strengthen() {
        let classifier = classifier();
        assert!(classifier.compound("very good") > classifier.compound("good"));
        assert!(classifier.compound("slightly good") < classifier.compound("good"));
    }

    #[test]
    fn identifiers_are_split_into_words() {
        let classifier = classifier();
        assert_eq!(
            classifier.score_text("handleUglyHack").label,
            SentimentLabel::Negative
        );
        assert_eq!(
            classifier.score_text("make_it_faster").label,
            SentimentLabel::Positive
        );
    }

    #[test]
    fn confidence_stays_in_range() {
        let classifier = classifier();
        for text in [
            "",
            "great great great amazing excellent perfect!!!!!!",
            "worst disaster ever, catastrophic failure",
            "bump version",
        ] {
            let score = classifier.score_text(text);
            assert!((0.5..=1.0).contains(&score.confidence), "{text}: {score:?}");
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let first = classifier().score_text("Improve the horrible error handling");
        let second = classifier().score_text("Improve the horrible error handling");
        assert_eq!(first, second);
    }

    #[test]
    fn truncation_respects_token_boundaries() {
        assert_eq!(truncate_at_token_boundary("alpha beta gamma", 2), "alpha beta");
        assert_eq!(truncate_at_token_boundary("alpha  beta\tgamma", 2), "alpha  beta");
        assert_eq!(truncate_at_token_boundary("  lead", 1), "  lead");
        assert_eq!(truncate_at_token_boundary("one two", 5), "one two");
        assert_eq!(truncate_at_token_boundary("one two", 0), "");
    }

    #[test]
    fn long_text_is_scored_on_its_prefix() {
        let classifier = LexiconClassifier::from_yaml(
            "model: tiny\nversion: 1\nmax_input_tokens: 2\nvalences:\n  awful: -2.0\n",
        )
        .unwrap();
        assert_eq!(classifier.score_text("all fine awful").label, SentimentLabel::Neutral);
        assert_eq!(classifier.score_text("awful all fine").label, SentimentLabel::Negative);
    }

    #[test]
    fn missing_model_file_is_unavailable() {
        let err = LexiconClassifier::from_model_name("/no/such/lexicon.yaml").unwrap_err();
        assert!(matches!(err, ClassifierError::ClassifierUnavailable(_)));
    }

    #[test]
    fn malformed_lexicon_is_unavailable() {
        let err = LexiconClassifier::from_yaml("model: [").unwrap_err();
        assert!(matches!(err, ClassifierError::ClassifierUnavailable(_)));
    }

    #[tokio::test]
    async fn trait_batch_preserves_order() {
        let classifier = classifier();
        let texts = vec![
            "great work".to_string(),
            "terrible bug".to_string(),
            "refactor module".to_string(),
        ];
        let scores = classifier.score_batch(&texts).await.unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0].label, SentimentLabel::Positive);
        assert_eq!(scores[1].label, SentimentLabel::Negative);
        assert_eq!(scores[2].label, SentimentLabel::Neutral);
    }
}
