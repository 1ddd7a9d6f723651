//! Concurrent, order-preserving batch scoring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ClassifierError, RetryPolicy, SentimentClassifier, SentimentScore};
use crate::error::AnalysisError;

/// No failure recorded yet.
const NO_FAILURE: usize = usize::MAX;

enum Outcome {
    Scored(SentimentScore),
    Failed(ClassifierError),
    Skipped,
}

/// Scores many texts concurrently through one classifier.
///
/// Output order always matches input order. The first fatal error stops
/// dispatch of the remaining texts, and a cancelled token discards the whole
/// batch.
pub struct BatchScorer {
    classifier: Arc<dyn SentimentClassifier>,
    concurrency: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl BatchScorer {
    /// Creates a scorer using the backend's recommended concurrency.
    pub fn new(classifier: Arc<dyn SentimentClassifier>) -> Self {
        let concurrency = classifier.metadata().recommended_concurrency.max(1);
        Self {
            classifier,
            concurrency,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the number of concurrent requests.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Overrides the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Uses an externally controlled cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Effective concurrency.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Scores every text, returning one score per text in input order.
    ///
    /// Fails with the first fatal [`ClassifierError`], or with
    /// [`AnalysisError::Cancelled`] when the token was cancelled.
    pub async fn score_all(&self, texts: &[String]) -> Result<Vec<SentimentScore>> {
        if self.cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled.into());
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            count = texts.len(),
            concurrency = self.concurrency,
            "Scoring batch"
        );

        // Cancelling the child stops siblings without touching the caller's token.
        let batch_token = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let first_failure = AtomicUsize::new(NO_FAILURE);

        let classifier = &self.classifier;
        let retry = &self.retry;
        let first_failure_ref = &first_failure;

        let futs: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let sem = semaphore.clone();
                let token = batch_token.clone();

                async move {
                    let permit = tokio::select! {
                        biased;
                        () = token.cancelled() => None,
                        permit = sem.acquire() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return Outcome::Skipped;
                    };
                    if token.is_cancelled() {
                        return Outcome::Skipped;
                    }

                    match retry.run(&token, || classifier.score(text)).await {
                        Ok(score) => Outcome::Scored(score),
                        Err(err) => {
                            if first_failure_ref
                                .compare_exchange(
                                    NO_FAILURE,
                                    index,
                                    Ordering::SeqCst,
                                    Ordering::SeqCst,
                                )
                                .is_ok()
                            {
                                warn!(index, error = %err, "Classification failed; stopping batch");
                            }
                            token.cancel();
                            Outcome::Failed(err)
                        }
                    }
                }
            })
            .collect();

        let outcomes = futures::future::join_all(futs).await;

        if self.cancel.is_cancelled() {
            debug!("Batch cancelled; discarding partial results");
            return Err(AnalysisError::Cancelled.into());
        }

        let failed_at = first_failure.load(Ordering::SeqCst);
        if failed_at != NO_FAILURE {
            if let Some(Outcome::Failed(err)) = outcomes.into_iter().nth(failed_at) {
                return Err(err.into());
            }
            return Err(AnalysisError::Cancelled.into());
        }

        let mut scores = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Outcome::Scored(score) => scores.push(score),
                Outcome::Failed(err) => return Err(err.into()),
                Outcome::Skipped => return Err(AnalysisError::Cancelled.into()),
            }
        }
        Ok(scores)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sentiment::test_utils::ConfigurableMockClassifier;
    use crate::sentiment::{LexiconClassifier, SentimentLabel};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn three_text_batch_keeps_order() {
        let scorer = BatchScorer::new(Arc::new(LexiconClassifier::embedded().unwrap()));
        let scores = scorer
            .score_all(&texts(&["great work", "terrible bug", "refactor module"]))
            .await
            .unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0].label, SentimentLabel::Positive);
        assert_eq!(scores[1].label, SentimentLabel::Negative);
    }

    #[tokio::test]
    async fn order_survives_out_of_order_completion() {
        let mock = ConfigurableMockClassifier::keyed(&[
            ("slow", SentimentLabel::Positive),
            ("fast", SentimentLabel::Negative),
            ("mid", SentimentLabel::Neutral),
        ])
        .with_delay("slow", Duration::from_millis(60))
        .with_delay("mid", Duration::from_millis(20));
        let handle = mock.record_handle();

        let scorer = BatchScorer::new(Arc::new(mock)).with_concurrency(3);
        let scores = scorer
            .score_all(&texts(&["slow", "fast", "mid"]))
            .await
            .unwrap();
        let labels: Vec<_> = scores.iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![
                SentimentLabel::Positive,
                SentimentLabel::Negative,
                SentimentLabel::Neutral
            ]
        );
        assert_eq!(handle.request_count(), 3);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let items: Vec<String> = (0..12).map(|i| format!("text {i}")).collect();
        let mock = ConfigurableMockClassifier::constant(SentimentLabel::Neutral)
            .with_default_delay(Duration::from_millis(10));
        let handle = mock.record_handle();

        let scorer = BatchScorer::new(Arc::new(mock)).with_concurrency(2);
        let scores = scorer.score_all(&items).await.unwrap();
        assert_eq!(scores.len(), 12);
        assert!(handle.max_in_flight() <= 2);
        assert!(handle.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let mock = ConfigurableMockClassifier::new(vec![
            Err(ClassifierError::RateLimited { retry_after: None }),
            Ok(SentimentScore::new(SentimentLabel::Positive, 0.9)),
        ]);
        let handle = mock.record_handle();

        let scorer = BatchScorer::new(Arc::new(mock)).with_retry_policy(fast_retry());
        let scores = scorer.score_all(&texts(&["yay"])).await.unwrap();
        assert_eq!(scores[0].label, SentimentLabel::Positive);
        assert_eq!(handle.request_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let mock = ConfigurableMockClassifier::new(
            (0..4)
                .map(|_| Err(ClassifierError::RateLimited { retry_after: None }))
                .collect(),
        );
        let scorer = BatchScorer::new(Arc::new(mock)).with_retry_policy(fast_retry());
        let err = scorer.score_all(&texts(&["x"])).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::RetriesExhausted { attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn fatal_error_stops_dispatch() {
        let mut responses = vec![Err(ClassifierError::ClassifierUnavailable(
            "down".to_string(),
        ))];
        responses.extend((0..9).map(|_| Ok(SentimentScore::new(SentimentLabel::Neutral, 1.0))));
        let mock = ConfigurableMockClassifier::new(responses);
        let handle = mock.record_handle();

        let items: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let scorer = BatchScorer::new(Arc::new(mock)).with_concurrency(1);
        let err = scorer.score_all(&items).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::ClassifierUnavailable(_))
        ));
        assert_eq!(handle.texts(), vec!["t0".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_token_discards_batch() {
        let cancel = CancellationToken::new();
        let mock = ConfigurableMockClassifier::constant(SentimentLabel::Positive)
            .with_default_delay(Duration::from_millis(20));
        let handle = mock.record_handle();

        let scorer = BatchScorer::new(Arc::new(mock))
            .with_concurrency(1)
            .with_cancellation(cancel.clone());
        let items: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            }
        };
        let (result, ()) = tokio::join!(scorer.score_all(&items), canceller);

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::Cancelled)
        ));
        assert!(handle.request_count() < items.len());
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let scorer = BatchScorer::new(Arc::new(LexiconClassifier::embedded().unwrap()));
        assert!(scorer.score_all(&[]).await.unwrap().is_empty());
    }
}
