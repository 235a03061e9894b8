//! Retry policies for query functions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;

/// Default number of retries after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff with base and max.
    Exponential {
        /// Initial delay.
        base: Duration,
        /// Maximum delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Exponential { base, max } => {
                let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                std::cmp::min(base.saturating_mul(multiplier), *max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    /// `min(1000ms * 2^attempt, 30s)`.
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(30),
        }
    }
}

/// Custom retry decision, called with the failure count so far and the error.
pub type RetryPredicate = Arc<dyn Fn(u32, &QueryError) -> bool + Send + Sync>;

/// Retry policy configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::default(),
            predicate: None,
        }
    }

    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::None,
            predicate: None,
        }
    }

    /// Set backoff strategy.
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Add a custom predicate. It is consulted only for errors the built-in
    /// rules would retry, so it can narrow retries but never retry a 4xx.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u32, &QueryError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Decide whether to retry after `failure_count` failures (1 after the
    /// first failed call).
    pub fn should_retry(&self, failure_count: u32, error: &QueryError) -> bool {
        if failure_count > self.max_retries || !error.is_transient() {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(failure_count, error),
            None => true,
        }
    }

    /// Delay before the retry that follows `failure_count` failures.
    pub fn delay_after(&self, failure_count: u32) -> Duration {
        self.backoff
            .delay_for_attempt(failure_count.saturating_sub(1))
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// `op` is called at most `max_retries + 1` times. The last error is
    /// returned once retries are exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, QueryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    failures += 1;
                    if !self.should_retry(failures, &error) {
                        return Err(error);
                    }
                    let delay = self.delay_after(failures);
                    tracing::debug!(
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying query"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
