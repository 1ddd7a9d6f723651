//! Shared test utilities for the `sentiment` module.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    ClassifierError, ClassifierFuture, ClassifierMetadata, SentimentClassifier, SentimentLabel,
    SentimentScore,
};
use crate::config::ClassifierBackend;

/// Mock classifier with pre-programmed answers.
///
/// Texts registered with [`keyed`](Self::keyed) always get their fixed score.
/// Any other text takes the next entry of the FIFO response queue, and once
/// the queue is empty the fallback score if one is set, or
/// `ClassifierUnavailable("no more mock responses")`.
///
/// Every call records its text; [`record_handle`](Self::record_handle) keeps
/// access to the log after the mock moved into an `Arc<dyn SentimentClassifier>`.
pub(crate) struct ConfigurableMockClassifier {
    responses: Arc<Mutex<VecDeque<Result<SentimentScore, ClassifierError>>>>,
    by_text: HashMap<String, SentimentScore>,
    fallback: Option<SentimentScore>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    metadata: ClassifierMetadata,
    recorded: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ConfigurableMockClassifier {
    /// Creates a mock that answers from `responses` in order.
    pub(crate) fn new(responses: Vec<Result<SentimentScore, ClassifierError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            by_text: HashMap::new(),
            fallback: None,
            delays: HashMap::new(),
            default_delay: None,
            metadata: ClassifierMetadata {
                backend: ClassifierBackend::Local,
                model: "mock-model".to_string(),
                max_input_tokens: 512,
                recommended_concurrency: 4,
            },
            recorded: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a mock with a fixed label (confidence 0.9) per text.
    pub(crate) fn keyed(entries: &[(&str, SentimentLabel)]) -> Self {
        let mut mock = Self::new(Vec::new());
        mock.by_text = entries
            .iter()
            .map(|(text, label)| ((*text).to_string(), SentimentScore::new(*label, 0.9)))
            .collect();
        mock
    }

    /// Creates a mock that gives every text the same label.
    pub(crate) fn constant(label: SentimentLabel) -> Self {
        let mut mock = Self::new(Vec::new());
        mock.fallback = Some(SentimentScore::new(label, 0.9));
        mock
    }

    /// Delays the answer for one text.
    pub(crate) fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Delays every answer without a text-specific delay.
    pub(crate) fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Returns a handle for inspecting calls after the mock has been moved.
    pub(crate) fn record_handle(&self) -> RecordHandle {
        RecordHandle {
            recorded: self.recorded.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }
    }

    fn next_answer(&self, text: &str) -> Result<SentimentScore, ClassifierError> {
        if let Some(score) = self.by_text.get(text) {
            return Ok(*score);
        }
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        self.fallback.ok_or_else(|| {
            ClassifierError::ClassifierUnavailable("no more mock responses".to_string())
        })
    }
}

/// Shared handle to a mock classifier's call log.
pub(crate) struct RecordHandle {
    recorded: Arc<Mutex<Vec<String>>>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordHandle {
    /// Returns every text scored so far, in call order.
    pub(crate) fn texts(&self) -> Vec<String> {
        self.recorded.lock().unwrap().clone()
    }

    /// Returns the number of calls made.
    pub(crate) fn request_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    /// Returns the highest number of calls that were running at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SentimentClassifier for ConfigurableMockClassifier {
    fn score<'a>(&'a self, text: &'a str) -> ClassifierFuture<'a, SentimentScore> {
        Box::pin(async move {
            self.recorded.lock().unwrap().push(text.to_string());
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(text).copied().or(self.default_delay) {
                tokio::time::sleep(delay).await;
            }
            let answer = self.next_answer(text);

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            answer
        })
    }

    fn metadata(&self) -> ClassifierMetadata {
        self.metadata.clone()
    }
}
