//! Sentiment classification backends.
//!
//! Every backend implements [`SentimentClassifier`]. The backend is picked once
//! by [`create_classifier`] and used through a trait object from then on.

pub mod batch;
pub mod error;
pub mod local;
pub mod remote;
pub mod retry;
#[cfg(test)]
pub(crate) mod test_utils;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AnalysisOptions, ClassifierBackend};

pub use batch::BatchScorer;
pub use error::ClassifierError;
pub use local::LexiconClassifier;
pub use remote::OpenAiClassifier;
pub use retry::RetryPolicy;

/// Future returned by classifier operations.
pub type ClassifierFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ClassifierError>> + Send + 'a>>;

/// Polarity assigned to a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    /// Favourable tone.
    Positive,
    /// No clear tone.
    Neutral,
    /// Unfavourable tone.
    Negative,
}

impl SentimentLabel {
    /// +1, 0 or -1.
    pub fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Neutral => 0.0,
            Self::Negative => -1.0,
        }
    }

    /// Parses a label case-insensitively, accepting the common short forms.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" | "POS" => Some(Self::Positive),
            "NEUTRAL" | "NEU" => Some(Self::Neutral),
            "NEGATIVE" | "NEG" => Some(Self::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Positive => "POSITIVE",
            Self::Neutral => "NEUTRAL",
            Self::Negative => "NEGATIVE",
        };
        f.write_str(name)
    }
}

/// A label with the classifier's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// Assigned polarity.
    pub label: SentimentLabel,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

impl SentimentScore {
    /// Creates a score, clamping confidence into `[0.0, 1.0]`.
    pub fn new(label: SentimentLabel, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { label, confidence }
    }

    /// Signed value: the label's sign scaled by confidence.
    pub fn value(&self) -> f64 {
        self.label.sign() * self.confidence
    }
}

/// Where a scored text came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Origin {
    /// A code unit, by `path:line:column`.
    CodeUnit(String),
}

/// A score paired with the text unit it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredText {
    /// Source of the text.
    pub origin: Origin,
    /// Its score.
    pub score: SentimentScore,
}

/// Describes a classifier backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierMetadata {
    /// Backend kind.
    pub backend: ClassifierBackend,
    /// Model identifier.
    pub model: String,
    /// Longest input, in whitespace tokens, scored without truncation.
    pub max_input_tokens: usize,
    /// Number of concurrent requests the backend handles comfortably.
    pub recommended_concurrency: usize,
}

/// Cumulative token counts reported by a metered backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Tokens sent.
    pub prompt_tokens: u64,
    /// Tokens generated.
    pub completion_tokens: u64,
    /// Sum of both.
    pub total_tokens: u64,
}

/// Trait for sentiment classifiers.
pub trait SentimentClassifier: Send + Sync {
    /// Scores one text.
    fn score<'a>(&'a self, text: &'a str) -> ClassifierFuture<'a, SentimentScore>;

    /// Scores texts one after another, returning scores in input order.
    ///
    /// [`BatchScorer`] runs the same work concurrently.
    fn score_batch<'a>(&'a self, texts: &'a [String]) -> ClassifierFuture<'a, Vec<SentimentScore>> {
        Box::pin(async move {
            let mut scores = Vec::with_capacity(texts.len());
            for text in texts {
                scores.push(self.score(text).await?);
            }
            Ok(scores)
        })
    }

    /// Returns metadata about the backend.
    fn metadata(&self) -> ClassifierMetadata;

    /// Token usage so far, for metered backends.
    fn usage(&self) -> Option<TokenUsage> {
        None
    }

    /// Token usage and estimated cost, for metered backends.
    fn cost_info(&self) -> Option<remote::CostInfo> {
        None
    }
}

/// Builds the classifier selected by the options.
pub fn create_classifier(options: &AnalysisOptions) -> Result<Arc<dyn SentimentClassifier>> {
    let model = options.effective_model();
    debug!(backend = %options.classifier_backend, model = %model, "Creating classifier");

    let classifier: Arc<dyn SentimentClassifier> = match options.classifier_backend {
        ClassifierBackend::Local => Arc::new(LexiconClassifier::from_model_name(&model)?),
        ClassifierBackend::Remote => {
            let api_key = options.resolved_api_key().ok_or_else(|| {
                ClassifierError::ClassifierUnavailable(format!(
                    "no API key; pass --api-key or set {}",
                    crate::config::API_KEY_ENV
                ))
            })?;
            Arc::new(
                OpenAiClassifier::builder(model, api_key)
                    .api_base(&options.api_base)
                    .organization(options.resolved_organization())
                    .timeout_secs(options.request_timeout_secs)
                    .build()?,
            )
        }
    };
    Ok(classifier)
}
