//! Per-query freshness and retry options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{BackoffStrategy, RetryPolicy};

/// Freshness windows and retry policy for one query.
///
/// - younger than `stale_time`: served from cache, no network call
/// - between `stale_time` and `gc_time`: served stale, revalidated in the background
/// - older than `gc_time`: evicted, fetched before returning
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: RetryPolicy,
}

impl QueryOptions {
    /// Create options with the default retry policy.
    pub fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            stale_time,
            gc_time: gc_time.max(stale_time),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Product lists and details: 5 minutes fresh, kept 10.
    pub fn products() -> Self {
        Self::new(Duration::from_secs(5 * 60), Duration::from_secs(10 * 60))
    }

    /// Collections change rarely: 10 minutes fresh, kept 30.
    pub fn collections() -> Self {
        Self::new(Duration::from_secs(10 * 60), Duration::from_secs(30 * 60))
    }

    /// Cart contents must track the server closely.
    pub fn cart() -> Self {
        Self::new(Duration::ZERO, Duration::from_secs(5 * 60)).with_retry(RetryPolicy::new(1))
    }

    /// User profile and orders.
    pub fn user() -> Self {
        Self::new(Duration::from_secs(5 * 60), Duration::from_secs(15 * 60))
    }

    /// Search results: 2 minutes fresh, kept 5.
    pub fn search() -> Self {
        Self::new(Duration::from_secs(2 * 60), Duration::from_secs(5 * 60))
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5 * 60))
    }
}

/// Serializable defaults for [`QueryOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefaults {
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_stale_time_ms() -> u64 {
    60 * 1000
}

fn default_gc_time_ms() -> u64 {
    5 * 60 * 1000
}

fn default_retry_count() -> u32 {
    crate::retry::DEFAULT_MAX_RETRIES
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl QueryDefaults {
    /// The retry policy these defaults describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count).with_backoff(BackoffStrategy::Exponential {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        })
    }

    /// Options for queries without a domain preset.
    pub fn to_options(&self) -> QueryOptions {
        QueryOptions::new(
            Duration::from_millis(self.stale_time_ms),
            Duration::from_millis(self.gc_time_ms),
        )
        .with_retry(self.retry_policy())
    }

    /// Apply the configured retry policy to a domain preset.
    pub fn apply(&self, preset: QueryOptions) -> QueryOptions {
        let max_retries = preset.retry.max_retries.min(self.retry_count);
        let mut retry = self.retry_policy();
        retry.max_retries = max_retries;
        preset.with_retry(retry)
    }
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            gc_time_ms: default_gc_time_ms(),
            retry_count: default_retry_count(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_time_never_below_stale_time() {
        let options = QueryOptions::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(options.gc_time, Duration::from_secs(60));
    }

    #[test]
    fn test_presets() {
        assert_eq!(QueryOptions::cart().stale_time, Duration::ZERO);
        assert_eq!(QueryOptions::cart().retry.max_retries, 1);
        assert!(QueryOptions::products().stale_time < QueryOptions::products().gc_time);
    }

    #[test]
    fn test_defaults_from_partial_toml_like_json() {
        let defaults: QueryDefaults = serde_json::from_str(r#"{"retry_count": 1}"#).unwrap();
        assert_eq!(defaults.retry_count, 1);
        assert_eq!(defaults.gc_time_ms, 300_000);

        let options = defaults.to_options();
        assert_eq!(options.retry.max_retries, 1);
        assert_eq!(options.stale_time, Duration::from_secs(60));
    }

    #[test]
    fn test_apply_keeps_preset_windows() {
        let defaults = QueryDefaults {
            retry_count: 0,
            ..Default::default()
        };
        let options = defaults.apply(QueryOptions::products());
        assert_eq!(options.stale_time, Duration::from_secs(300));
        assert_eq!(options.retry.max_retries, 0);
    }
}
