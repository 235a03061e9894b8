//! Process-local TTL cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, Timestamp};

/// Default chance that a write triggers a full expiry sweep.
pub const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.1;

/// Shortest period the interval sweep runs at.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// A cached value with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The key the entry is stored under.
    pub key: String,
    /// The cached value.
    pub data: V,
    /// When the entry was written.
    pub inserted_at: Timestamp,
    /// When the entry stops being served.
    pub expires_at: Timestamp,
}

impl<V> CacheEntry<V> {
    /// An entry is live while `now < expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Remaining time to live.
    pub fn remaining_ttl(&self, now: Timestamp) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because they expired (on read or during a sweep).
    pub expirations: u64,
    /// Entries currently stored, including not-yet-swept expired ones.
    pub entries: usize,
}

/// Configuration for a [`TtlCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlCacheConfig {
    /// TTL applied by callers that do not pick their own.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Interval of the backstop sweep task.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Chance in `[0, 1]` that a write runs a sweep.
    #[serde(default = "default_cleanup_probability")]
    pub cleanup_probability: f64,
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_cleanup_interval_ms() -> u64 {
    60 * 1000
}

fn default_cleanup_probability() -> f64 {
    DEFAULT_CLEANUP_PROBABILITY
}

impl TtlCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            cleanup_probability: default_cleanup_probability(),
        }
    }
}

/// In-memory key/value cache with absolute per-entry expiry.
///
/// A miss is `None`, never an error. Concurrent writers to one key resolve
/// as last write wins. Expired entries are dropped when read, by a sweep that
/// runs with [`cleanup_probability`](Self::with_cleanup_probability) after
/// each write, and by the interval task from [`spawn_cleanup`](Self::spawn_cleanup).
///
/// # Example
///
/// ```rust,ignore
/// let cache = TtlCache::new(TokioClock::shared());
/// cache.set("seo:/products/tee", meta, Duration::from_secs(300));
/// let hit: Option<SeoMetadata> = cache.get("seo:/products/tee");
/// ```
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    cleanup_probability: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Create a cache from configuration.
    pub fn from_config(clock: Arc<dyn Clock>, config: &TtlCacheConfig) -> Self {
        Self::new(clock).with_cleanup_probability(config.cleanup_probability)
    }

    /// Set the chance that a write sweeps expired entries. Clamped to `[0, 1]`.
    pub fn with_cleanup_probability(mut self, probability: f64) -> Self {
        self.cleanup_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Store a value that expires `ttl` from now.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.clone(),
            data: value,
            inserted_at: now,
            expires_at: now.saturating_add(ttl),
        };
        self.entries.lock().insert(key, entry);

        if self.should_sweep() {
            self.cleanup();
        }
    }

    /// Get a live value. An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get a live entry with its metadata, without touching the counters.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .cloned()
    }

    /// Return the cached value or run `fetch` and cache its result.
    ///
    /// Errors from `fetch` are returned and nothing is cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TtlCacheStats {
        TtlCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn should_sweep(&self) -> bool {
        if self.cleanup_probability <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(self.cleanup_probability)
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Spawn the interval sweep.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    /// Abort the handle to stop it earlier. Intervals below
    /// [`MIN_CLEANUP_INTERVAL`] are raised to it.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(MIN_CLEANUP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(strong) = cache.upgrade() else {
                    tracing::debug!("ttl cache dropped, stopping sweep");
                    break;
                };

                let removed = strong.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "ttl sweep removed expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};

    fn cache_with_clock() -> (TtlCache<String>, ManualClock) {
        let clock = ManualClock::new();
        let cache = TtlCache::new(Arc::new(clock.clone())).with_cleanup_probability(0.0);
        (cache, clock)
    }

    #[test]
    fn test_get_before_and_after_expiry() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_millis(100));

        clock.advance(Duration::from_millis(50));
        assert_eq!(cache.get("k"), Some("v".to_string()));

        clock.advance(Duration::from_millis(100));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired read should evict");
    }

    #[test]
    fn test_expiry_boundary_is_a_miss() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_millis(100));

        clock.advance(Duration::from_millis(100));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "first".to_string(), Duration::from_millis(10));
        cache.set("k", "second".to_string(), Duration::from_secs(60));

        clock.advance(Duration::from_millis(20));
        assert_eq!(cache.get("k"), Some("second".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete() {
        let (cache, _clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_secs(1));

        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (cache, clock) = cache_with_clock();
        cache.set("short", "a".to_string(), Duration::from_millis(10));
        cache.set("long", "b".to_string(), Duration::from_secs(10));

        clock.advance(Duration::from_millis(20));
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some("b".to_string()));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_write_sweeps_when_probability_is_one() {
        let clock = ManualClock::new();
        let cache = TtlCache::new(Arc::new(clock.clone())).with_cleanup_probability(1.0);
        cache.set("old", 1u32, Duration::from_millis(10));

        clock.advance(Duration::from_millis(20));
        cache.set("new", 2u32, Duration::from_secs(1));

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_probability_is_clamped() {
        let clock = ManualClock::new();
        let cache: TtlCache<u32> =
            TtlCache::new(Arc::new(clock)).with_cleanup_probability(7.5);
        // Would panic inside gen_bool if left out of range.
        cache.set("k", 1, Duration::from_secs(1));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let (cache, _clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_secs(1));

        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_caches_success_only() {
        let (cache, _clock) = cache_with_clock();

        let err: Result<String, &str> = cache
            .get_or_try_insert_with("k", Duration::from_secs(1), || async { Err("boom") })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());

        let ok: Result<String, &str> = cache
            .get_or_try_insert_with("k", Duration::from_secs(1), || async {
                Ok("fetched".to_string())
            })
            .await;
        assert_eq!(ok.unwrap(), "fetched");

        let cached: Result<String, &str> = cache
            .get_or_try_insert_with("k", Duration::from_secs(1), || async {
                Err("should not be called")
            })
            .await;
        assert_eq!(cached.unwrap(), "fetched");
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_cleanup_sweeps_on_interval() {
        let cache = Arc::new(
            TtlCache::new(TokioClock::shared()).with_cleanup_probability(0.0),
        );
        cache.set("k", 1u32, Duration::from_millis(100));
        let handle = cache.spawn_cleanup(Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.len(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cleanup_interval_keeps_sweeping() {
        let cache = Arc::new(
            TtlCache::new(TokioClock::shared()).with_cleanup_probability(0.0),
        );
        let handle = cache.spawn_cleanup(Duration::ZERO);

        cache.set("k", 1u32, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.len(), 0);
        assert!(!handle.is_finished());
        handle.abort();
    }
}
