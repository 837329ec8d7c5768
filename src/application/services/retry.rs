use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::value_objects::RetryPolicy;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs async operations under a [`RetryPolicy`].
///
/// Errors the policy classifies as fatal are returned unchanged on first
/// occurrence. Transient errors are retried with exponential backoff until
/// the attempt budget is spent, at which point the last error is wrapped in
/// [`DeployError::RetriesExhausted`].
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay before the next attempt, honoring a server `Retry-After` hint.
    fn next_delay(&self, attempt: u32, error: &DeployError) -> Duration {
        let delay = self.policy.delay_for(attempt);
        match error.retry_after() {
            Some(hint) => delay.max(hint.min(self.policy.max_delay)),
            None => delay,
        }
    }

    /// Run `op` until it succeeds, fails fatally, is cancelled or exhausts its attempts.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationSignal,
        mut op: F,
    ) -> DeployResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            cancel.check()?;
            attempt += 1;

            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.policy.is_retryable(&error) {
                return Err(error);
            }

            if attempt >= self.policy.max_attempts {
                return Err(DeployError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last_error: Box::new(error),
                });
            }

            let delay = self.next_delay(attempt, &error);
            warn!(
                operation,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            cancel.sleep(delay).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(40))
            .with_jitter_ratio(0.1)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let retrier = Retrier::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationSignal::new();

        let counter = calls.clone();
        let started = Instant::now();
        let value = retrier
            .run("flaky", &cancel, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(DeployError::api_error(503, None, "unavailable"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let policy = retrier.policy();
        let bound = policy.max_delay_for(1) + policy.max_delay_for(2);
        // Scheduling slack on top of the two backoff sleeps.
        assert!(started.elapsed() < bound + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let retrier = Retrier::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: DeployResult<()> = retrier
            .run("fatal", &CancellationSignal::new(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DeployError::api_error(400, Some("InvalidInput".into()), "bad"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(DeployError::Api { status, code, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("InvalidInput"));
            }
            other => panic!("expected original Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let retrier = Retrier::new(fast_policy(3));
        let result: DeployResult<()> = retrier
            .run("always_throttled", &CancellationSignal::new(), || async {
                Err(DeployError::api_error(429, None, "slow down"))
            })
            .await;

        match result {
            Err(DeployError::RetriesExhausted {
                operation,
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(operation, "always_throttled");
                assert_eq!(attempts, 3);
                assert_eq!(last_error.status(), Some(429));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let retrier = Retrier::new(fast_policy(3));
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: DeployResult<()> = retrier
            .run("cancelled", &cancel, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(DeployError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let retrier = Retrier::new(fast_policy(3).with_jitter_ratio(0.0));
        let hinted = DeployError::Api {
            status: 429,
            code: None,
            message: "throttled".into(),
            retry_after: Some(Duration::from_millis(25)),
        };
        assert_eq!(retrier.next_delay(1, &hinted), Duration::from_millis(25));

        let huge = DeployError::Api {
            status: 429,
            code: None,
            message: "throttled".into(),
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(retrier.next_delay(1, &huge), Duration::from_millis(40));
    }
}
