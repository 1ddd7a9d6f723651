//! Bounded retry with exponential backoff for transient classifier failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ClassifierError;

/// Delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Longest wait between attempts, `Retry-After` included.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// How often and how patiently a failed request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default delays and the given retry ceiling.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), honouring a server hint.
    pub fn delay_for(&self, retry: u32, err: &ClassifierError) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        let backoff = self.base_delay.saturating_mul(factor);
        let delay = match err.retry_after() {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// A cancelled token stops further attempts; the last error is returned
    /// and the caller decides how to report the cancellation.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ClassifierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifierError>>,
    {
        let mut retry = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if retry >= self.max_retries {
                warn!(attempts = retry + 1, error = %err, "Retries exhausted");
                return Err(ClassifierError::RetriesExhausted {
                    attempts: retry + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(retry, &err);
            debug!(retry = retry + 1, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
            tokio::select! {
                () = cancel.cancelled() => return Err(err),
                () = tokio::time::sleep(delay) => {}
            }
            retry += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(8));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let err = ClassifierError::Timeout;
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40, &err), Duration::from_secs(8));
    }

    #[test]
    fn retry_after_is_honoured_up_to_cap() {
        let policy = RetryPolicy::default();
        let hinted = ClassifierError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(policy.delay_for(0, &hinted), Duration::from_secs(3));

        let huge = ClassifierError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.delay_for(0, &huge), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .run(&CancellationToken::new(), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClassifierError::RateLimited { retry_after: None })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast(2)
            .run(&CancellationToken::new(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifierError::Timeout)
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ClassifierError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClassifierError::Timeout));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast(5)
            .run(&CancellationToken::new(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifierError::ApiRequestFailed("HTTP 500".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ClassifierError::ApiRequestFailed(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let err = policy
            .run(&cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifierError::Timeout)
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ClassifierError::Timeout));
    }
}
