use crate::common::error::DeployError;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether an error may be retried.
pub type RetryClassifier = Arc<dyn Fn(&DeployError) -> bool + Send + Sync>;

/// Exponential backoff policy with bounded jitter.
///
/// The delay before attempt `n + 1` (after `n` failures) is
/// `min(base_delay * multiplier^(n - 1), max_delay)` plus a random jitter in
/// `[0, delay * jitter_ratio]`. Read-only once constructed.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
    classifier: RetryClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.1,
            classifier: Arc::new(DeployError::is_transient),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter_ratio", &self.jitter_ratio)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&DeployError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, error: &DeployError) -> bool {
        (self.classifier)(error)
    }

    /// Capped delay before the retry that follows failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Upper bound of [`RetryPolicy::delay_for`] for the same attempt.
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        base + base.mul_f64(self.jitter_ratio)
    }

    /// Delay with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let jitter_range = base.mul_f64(self.jitter_ratio).as_millis() as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
            .with_jitter_ratio(0.0);

        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay_for(60), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(200))
            .with_jitter_ratio(0.5);

        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= policy.max_delay_for(1));
        }
    }

    #[test]
    fn test_default_classifier_is_transient() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&DeployError::api_error(503, None, "unavailable")));
        assert!(!policy.is_retryable(&DeployError::api_error(400, None, "bad request")));

        let custom = policy.with_classifier(|_| false);
        assert!(!custom.is_retryable(&DeployError::api_error(503, None, "unavailable")));
    }

    #[test]
    fn test_builder_sanitizes_values() {
        let policy = RetryPolicy::default()
            .with_max_attempts(0)
            .with_multiplier(0.5)
            .with_jitter_ratio(4.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.jitter_ratio, 1.0);
    }
}
