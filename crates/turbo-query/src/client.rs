//! Stale-while-revalidate query client.
//!
//! The client owns one entry per [`QueryKey`]. Reads go through
//! [`QueryClient::fetch_query`], which classifies the cached entry by age:
//!
//! - younger than `stale_time`: returned without calling the fetcher
//! - younger than `gc_time`: returned immediately, refetched in the background
//! - otherwise: evicted and fetched before returning
//!
//! Failed fetches are recorded as the entry's error. They never replace data.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use turbo_cache::{Clock, Timestamp, TokioClock};

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::QueryOptions;
use crate::retry::RetryPolicy;
use crate::state::QueryState;

type ErasedValue = Arc<dyn Any + Send + Sync>;
type FetchOutcome = Result<ErasedValue, QueryError>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>;

/// A page of results that knows whether more pages follow.
pub trait Paginated {
    /// Items on this page.
    fn item_count(&self) -> usize;
    /// Whether the server reported further pages.
    fn has_more(&self) -> bool;
}

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub entries: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

struct QueryEntry {
    data: Option<ErasedValue>,
    data_updated_at: Option<Timestamp>,
    error: Option<QueryError>,
    error_updated_at: Option<Timestamp>,
    invalidated: bool,
    fetching: bool,
    /// Outcome of the last fetch. `None` is sent when a fetch is dropped
    /// before it settles.
    settled: watch::Sender<Option<FetchOutcome>>,
    fetcher: Option<ErasedFetcher>,
    options: QueryOptions,
}

impl QueryEntry {
    fn new(options: QueryOptions) -> Self {
        Self {
            data: None,
            data_updated_at: None,
            error: None,
            error_updated_at: None,
            invalidated: false,
            fetching: false,
            settled: watch::channel(None).0,
            fetcher: None,
            options,
        }
    }

    /// Data that has not outlived its gc time.
    fn live_data(&self, now: Timestamp) -> Option<&ErasedValue> {
        let updated_at = self.data_updated_at?;
        if now.saturating_duration_since(updated_at) >= self.options.gc_time {
            return None;
        }
        self.data.as_ref()
    }

    fn is_stale(&self, now: Timestamp) -> bool {
        match self.data_updated_at {
            Some(at) => self.invalidated || now.saturating_duration_since(at) >= self.options.stale_time,
            None => true,
        }
    }

    fn last_updated(&self) -> Option<Timestamp> {
        self.data_updated_at.max(self.error_updated_at)
    }

    fn write(&mut self, data: ErasedValue, now: Timestamp) {
        self.data = Some(data);
        self.data_updated_at = Some(now);
        self.error = None;
        self.error_updated_at = None;
        self.invalidated = false;
    }
}

enum Lookup {
    Fresh(ErasedValue),
    Stale { data: ErasedValue, revalidate: bool },
    /// No usable data and another caller is already fetching it.
    InFlight(watch::Receiver<Option<FetchOutcome>>),
    Miss,
}

/// Prior state of one entry, captured before an optimistic write.
pub(crate) struct Snapshot {
    pub(crate) key: QueryKey,
    existed: bool,
    data: Option<ErasedValue>,
    data_updated_at: Option<Timestamp>,
    invalidated: bool,
}

struct ClientInner {
    entries: Mutex<HashMap<QueryKey, QueryEntry>>,
    clock: Arc<dyn Clock>,
    defaults: QueryOptions,
    counters: Counters,
}

/// Shared query cache. Cloning is cheap and every clone sees the same
/// entries.
///
/// # Example
///
/// ```rust,ignore
/// let client = QueryClient::new(TokioClock::shared(), QueryOptions::default());
/// let product: Product = client
///     .fetch_query(&keys::products::detail("tee"), &QueryOptions::products(), move || {
///         api.get_product("tee")
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl QueryClient {
    /// Create a client. `defaults` apply to entries written without options.
    pub fn new(clock: Arc<dyn Clock>, defaults: QueryOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                entries: Mutex::new(HashMap::new()),
                clock,
                defaults,
                counters: Counters::default(),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn defaults(&self) -> &QueryOptions {
        &self.inner.defaults
    }

    fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Read through the cache.
    ///
    /// The fetcher is remembered so invalidation can refetch the entry
    /// later. Errors are returned only when there is no usable cached data.
    /// A miss while another fetch of the same key is running waits for that
    /// fetch and shares its result.
    pub async fn fetch_query<T, F, Fut>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let fetcher = erase(fetcher);
        loop {
            match self.lookup::<T>(key, options, &fetcher) {
                Lookup::Fresh(data) => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, "query cache hit");
                    return downcast(data);
                }
                Lookup::Stale { data, revalidate } => {
                    self.inner.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                    if revalidate {
                        tracing::debug!(key = %key, "serving stale data, revalidating");
                        self.spawn_revalidation(key.clone(), fetcher, options.retry.clone());
                    }
                    return downcast(data);
                }
                Lookup::InFlight(mut settled) => {
                    tracing::trace!(key = %key, "awaiting in-flight fetch");
                    if settled.changed().await.is_ok() {
                        let outcome = settled.borrow_and_update().clone();
                        if let Some(outcome) = outcome {
                            let data = outcome?;
                            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                            return downcast(data);
                        }
                    }
                    // The other fetch was dropped or its entry removed.
                }
                Lookup::Miss => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let data = self
                        .fetch_and_store(key.clone(), fetcher, options.retry.clone())
                        .await?;
                    return downcast(data);
                }
            }
        }
    }

    /// Like [`fetch_query`](Self::fetch_query) but reports the outcome as a
    /// [`QueryState`] instead of a `Result`.
    pub async fn query<T, F, Fut>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: F,
    ) -> QueryState<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let result = self.fetch_query(key, options, fetcher).await;
        let mut state = self.query_state::<T>(key);
        match result {
            Ok(data) => state.data = Some(data),
            Err(error) => state.error = Some(error),
        }
        state
    }

    /// Warm the cache without returning data.
    ///
    /// Does nothing when fresh data is cached or a fetch is already in
    /// flight. Failures are logged and otherwise ignored.
    pub async fn prefetch_query<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetcher: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let fetcher = erase(fetcher);
        let needs_fetch = {
            let now = self.now();
            let mut entries = self.inner.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| QueryEntry::new(options.clone()));
            entry.fetcher = Some(fetcher.clone());
            entry.options = options.clone();

            let has_fresh = entry.live_data(now).is_some_and(|d| d.is::<T>()) && !entry.is_stale(now);
            if entry.fetching || has_fresh {
                false
            } else {
                entry.fetching = true;
                true
            }
        };

        if !needs_fetch {
            tracing::trace!(key = %key, "prefetch skipped");
            return;
        }

        if let Err(error) = self
            .fetch_and_store(key.clone(), fetcher, options.retry.clone())
            .await
        {
            tracing::debug!(key = %key, error = %error, "prefetch failed");
        }
    }

    /// Fetch one page and, when that page is full and the server reports
    /// more, prefetch the next page in the background.
    pub async fn fetch_paginated<T, K, F, Fut>(
        &self,
        page: u32,
        page_size: usize,
        options: &QueryOptions,
        key_for: K,
        fetch_page: F,
    ) -> Result<T, QueryError>
    where
        T: Paginated + Clone + Send + Sync + 'static,
        K: Fn(u32) -> QueryKey,
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let fetch_page = Arc::new(fetch_page);

        let current = Arc::clone(&fetch_page);
        let data = self
            .fetch_query(&key_for(page), options, move || current(page))
            .await?;

        if page_size > 0 && data.item_count() >= page_size && data.has_more() {
            let next = page.saturating_add(1);
            let next_key = key_for(next);
            let client = self.clone();
            let options = options.clone();
            tokio::spawn(async move {
                client
                    .prefetch_query(&next_key, &options, move || fetch_page(next))
                    .await;
            });
        }

        Ok(data)
    }

    /// Cached data regardless of staleness.
    pub fn get_query_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let now = self.now();
        let entries = self.inner.entries.lock();
        entries
            .get(key)
            .and_then(|entry| entry.live_data(now))
            .and_then(|data| data.downcast_ref::<T>().cloned())
    }

    /// Write data directly. The entry counts as freshly fetched.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(self.inner.defaults.clone()))
            .write(Arc::new(data), now);
    }

    /// Replace cached data with `update(current)` under one lock.
    pub fn update_query_data<T, F>(&self, key: &QueryKey, update: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> T,
    {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(self.inner.defaults.clone()));
        let current = entry.live_data(now).and_then(|d| d.downcast_ref::<T>());
        let next = update(current);
        entry.write(Arc::new(next.clone()), now);
        next
    }

    /// Current state of one query.
    pub fn query_state<T: Clone + 'static>(&self, key: &QueryKey) -> QueryState<T> {
        let now = self.now();
        let entries = self.inner.entries.lock();
        let Some(entry) = entries.get(key) else {
            return QueryState::idle();
        };

        let data = entry
            .live_data(now)
            .and_then(|d| d.downcast_ref::<T>().cloned());
        QueryState {
            is_loading: data.is_none() && entry.fetching,
            is_fetching: entry.fetching,
            is_stale: entry.is_stale(now),
            data_updated_at: entry.data_updated_at,
            error: entry.error.clone(),
            data,
        }
    }

    /// Mark every entry under `prefix` stale and refetch those with a known
    /// fetcher. Resolves once all refetches have settled.
    ///
    /// Returns the number of entries matched.
    pub async fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let (matched, refetches) = {
            let mut entries = self.inner.entries.lock();
            let mut matched = 0;
            let mut refetches = Vec::new();
            for (key, entry) in entries.iter_mut() {
                if !prefix.is_prefix_of(key) {
                    continue;
                }
                matched += 1;
                entry.invalidated = true;
                if let Some(fetcher) = &entry.fetcher {
                    entry.fetching = true;
                    refetches.push((key.clone(), Arc::clone(fetcher), entry.options.retry.clone()));
                }
            }
            (matched, refetches)
        };

        tracing::debug!(
            prefix = %prefix,
            matched,
            refetching = refetches.len(),
            "invalidating queries"
        );

        let outcomes = join_all(refetches.into_iter().map(|(key, fetcher, retry)| {
            let refetch = self.fetch_and_store(key.clone(), fetcher, retry);
            async move { (key, refetch.await) }
        }))
        .await;

        for (key, result) in outcomes {
            if let Err(error) = result {
                tracing::warn!(key = %key, error = %error, "refetch after invalidation failed");
            }
        }

        matched
    }

    /// Drop every entry under `prefix`.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !prefix.is_prefix_of(key));
        before - entries.len()
    }

    /// Drop entries whose last update is older than their gc time.
    /// Entries with a fetch in flight are kept.
    pub fn garbage_collect(&self) -> usize {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.fetching
                || entry
                    .last_updated()
                    .is_some_and(|at| now.saturating_duration_since(at) < entry.options.gc_time)
        });
        before - entries.len()
    }

    /// Run [`garbage_collect`](Self::garbage_collect) every `interval` until
    /// the last client handle is dropped.
    pub fn spawn_garbage_collector(&self, interval: Duration) -> JoinHandle<()> {
        let inner: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let interval = interval.max(turbo_cache::MIN_CLEANUP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    tracing::debug!("query client dropped, stopping gc");
                    break;
                };
                let removed = QueryClient { inner }.garbage_collect();
                if removed > 0 {
                    tracing::debug!(removed, "collected query entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    pub fn stats(&self) -> QueryStats {
        let counters = &self.inner.counters;
        QueryStats {
            entries: self.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Capture an entry and write `update(current)` in its place, under one
    /// lock so no reader observes a half-applied change.
    pub(crate) fn apply_optimistic<T, F>(&self, key: &QueryKey, update: F) -> Snapshot
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> T,
    {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        let existed = entries.contains_key(key);
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(self.inner.defaults.clone()));

        let snapshot = Snapshot {
            key: key.clone(),
            existed,
            data: entry.data.clone(),
            data_updated_at: entry.data_updated_at,
            invalidated: entry.invalidated,
        };

        let current = entry.live_data(now).and_then(|d| d.downcast_ref::<T>());
        let next = update(current);
        entry.write(Arc::new(next), now);
        snapshot
    }

    /// Put a snapshotted entry back.
    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut entries = self.inner.entries.lock();
        let orphaned = match entries.get_mut(&snapshot.key) {
            Some(entry) if !snapshot.existed && !entry.fetching && entry.fetcher.is_none() => true,
            Some(entry) => {
                entry.data = snapshot.data;
                entry.data_updated_at = snapshot.data_updated_at;
                entry.invalidated = snapshot.invalidated;
                false
            }
            None => false,
        };
        if orphaned {
            entries.remove(&snapshot.key);
        }
    }

    fn lookup<T: 'static>(&self, key: &QueryKey, options: &QueryOptions, fetcher: &ErasedFetcher) -> Lookup {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(options.clone()));
        entry.fetcher = Some(Arc::clone(fetcher));
        entry.options = options.clone();

        match entry.live_data(now) {
            Some(data) if data.is::<T>() => {
                let data = Arc::clone(data);
                if !entry.is_stale(now) {
                    return Lookup::Fresh(data);
                }
                let revalidate = !entry.fetching;
                entry.fetching = true;
                Lookup::Stale { data, revalidate }
            }
            _ => {
                if entry.data.is_some() {
                    tracing::trace!(key = %key, "evicting expired query data");
                    entry.data = None;
                    entry.data_updated_at = None;
                }
                if entry.fetching {
                    return Lookup::InFlight(entry.settled.subscribe());
                }
                entry.fetching = true;
                Lookup::Miss
            }
        }
    }

    fn spawn_revalidation(&self, key: QueryKey, fetcher: ErasedFetcher, retry: RetryPolicy) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.fetch_and_store(key.clone(), fetcher, retry).await {
                tracing::warn!(key = %key, error = %error, "background revalidation failed");
            }
        });
    }

    /// Run `fetcher` under `retry` and store the outcome. The caller has
    /// already marked the entry as fetching; the guard is armed before the
    /// returned future is first polled, so dropping it unpolled still clears
    /// the flag.
    fn fetch_and_store(
        &self,
        key: QueryKey,
        fetcher: ErasedFetcher,
        retry: RetryPolicy,
    ) -> impl Future<Output = FetchOutcome> + Send + 'static {
        let mut guard = FetchingGuard {
            client: self.clone(),
            key,
            armed: true,
        };

        async move {
            guard.client.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);
            let result = retry.run(|| fetcher()).await;

            guard.armed = false;
            guard.client.store(&guard.key, &result);
            result
        }
    }

    fn store(&self, key: &QueryKey, result: &FetchOutcome) {
        let now = self.now();
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(self.inner.defaults.clone()));
        entry.fetching = false;

        match result {
            Ok(data) => entry.write(Arc::clone(data), now),
            Err(error) => {
                self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                entry.error = Some(error.clone());
                entry.error_updated_at = Some(now);
            }
        }
        entry.settled.send_replace(Some(result.clone()));
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(TokioClock::shared(), QueryOptions::default())
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.len())
            .field("defaults", &self.inner.defaults)
            .finish()
    }
}

/// Clears the in-flight flag if a fetch future is dropped before it settles.
struct FetchingGuard {
    client: QueryClient,
    key: QueryKey,
    armed: bool,
}

impl Drop for FetchingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(entry) = self.client.inner.entries.lock().get_mut(&self.key) {
            entry.fetching = false;
            entry.settled.send_replace(None);
        }
    }
}

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        async move { fut.await.map(|value| Arc::new(value) as ErasedValue) }.boxed()
    })
}

fn downcast<T: Clone + 'static>(data: ErasedValue) -> Result<T, QueryError> {
    data.downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| QueryError::Decode(format!("cached value is not a {}", std::any::type_name::<T>())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    fn client() -> QueryClient {
        QueryClient::new(TokioClock::shared(), QueryOptions::default())
    }

    fn options(stale_secs: u64, gc_secs: u64) -> QueryOptions {
        QueryOptions::new(Duration::from_secs(stale_secs), Duration::from_secs(gc_secs))
    }

    /// Fetcher that resolves to its own call number.
    fn counter(
        calls: &Arc<AtomicU32>,
    ) -> impl Fn() -> futures::future::Ready<Result<u32, QueryError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || futures::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn failing(
        calls: &Arc<AtomicU32>,
        status: u16,
    ) -> impl Fn() -> futures::future::Ready<Result<u32, QueryError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(QueryError::from_status(status, "failed")))
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_skips_fetcher() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300);

        assert_eq!(client.fetch_query(&key, &opts, counter(&calls)).await, Ok(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(client.fetch_query(&key, &opts, counter(&calls)).await, Ok(1));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_served_then_revalidated() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300);

        client.fetch_query(&key, &opts, counter(&calls)).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        // Stale value comes back immediately.
        assert_eq!(client.fetch_query(&key, &opts, counter(&calls)).await, Ok(1));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.get_query_data::<u32>(&key), Some(2));
        assert!(!client.query_state::<u32>(&key).is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stale_reads_revalidate_once() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::cart::current();
        let opts = options(1, 300);

        client.fetch_query(&key, &opts, counter(&calls)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        client.fetch_query(&key, &opts, counter(&calls)).await.unwrap();
        client.fetch_query(&key, &opts, counter(&calls)).await.unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_data_is_refetched_before_returning() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::collections::detail("summer");
        let opts = options(60, 300);

        client.fetch_query(&key, &opts, counter(&calls)).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(client.fetch_query(&key, &opts, counter(&calls)).await, Ok(2));
        assert_eq!(client.stats().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_on_server_errors() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300).with_retry(RetryPolicy::new(2));

        let result = client.fetch_query(&key, &opts, failing(&calls, 503)).await;

        assert!(matches!(result, Err(QueryError::Server { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = client.query_state::<u32>(&key);
        assert!(state.data.is_none());
        assert!(state.is_error());
        assert!(!state.is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("missing");

        let state = client
            .query::<u32, _, _>(&key, &options(60, 300), failing(&calls, 404))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.error.and_then(|e| e.status()).map(|s| s.as_u16()), Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refetch_keeps_previous_data() {
        let client = client();
        let key = keys::user::profile();
        let healthy = Arc::new(AtomicBool::new(true));
        let opts = options(60, 300).with_retry(RetryPolicy::none());

        let h = Arc::clone(&healthy);
        let fetcher = move || {
            let ok = h.load(Ordering::SeqCst);
            async move {
                if ok {
                    Ok("alice".to_string())
                } else {
                    Err(QueryError::Network("offline".into()))
                }
            }
        };

        client.fetch_query(&key, &opts, fetcher).await.unwrap();
        healthy.store(false, Ordering::SeqCst);
        client.invalidate_queries(&keys::user::all()).await;

        let state = client.query_state::<String>(&key);
        assert_eq!(state.data.as_deref(), Some("alice"));
        assert_eq!(state.error, Some(QueryError::Network("offline".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_refetches_matching_prefix_only() {
        let client = client();
        let product_calls = Arc::new(AtomicU32::new(0));
        let cart_calls = Arc::new(AtomicU32::new(0));
        let opts = options(600, 1200);

        let list = keys::products::list(&keys::ProductFilters::new().page(1));
        let cart = keys::cart::current();
        client.fetch_query(&list, &opts, counter(&product_calls)).await.unwrap();
        client.fetch_query(&cart, &opts, counter(&cart_calls)).await.unwrap();

        let matched = client.invalidate_queries(&keys::products::all()).await;

        assert_eq!(matched, 1);
        assert_eq!(client.get_query_data::<u32>(&list), Some(2));
        assert_eq!(cart_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_update_query_data() {
        let client = client();
        let key = keys::cart::count();

        assert_eq!(client.get_query_data::<u32>(&key), None);
        client.set_query_data(&key, 2u32);
        let next = client.update_query_data::<u32, _>(&key, |n| n.copied().unwrap_or(0) + 1);

        assert_eq!(next, 3);
        assert_eq!(client.get_query_data::<u32>(&key), Some(3));
        // Wrong type reads as absent.
        assert_eq!(client.get_query_data::<String>(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_swallows_errors() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::search::results("boots", &keys::SearchFilters::default());

        client
            .prefetch_query(&key, &options(60, 300).with_retry(RetryPolicy::none()), failing(&calls, 500))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(client.query_state::<u32>(&key).is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_skips_fresh_entries() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300);

        client.prefetch_query(&key, &opts, counter(&calls)).await;
        client.prefetch_query(&key, &opts, counter(&calls)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.fetch_query(&key, &opts, counter(&calls)).await, Ok(1));
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Page {
        page: u32,
        items: usize,
        more: bool,
    }

    impl Paginated for Page {
        fn item_count(&self) -> usize {
            self.items
        }

        fn has_more(&self) -> bool {
            self.more
        }
    }

    fn orders_page(page: u32) -> futures::future::Ready<Result<Page, QueryError>> {
        let (items, more) = if page < 3 { (10, true) } else { (4, false) };
        futures::future::ready(Ok(Page { page, items, more }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_page_prefetches_next() {
        let client = client();
        let opts = options(60, 300);

        let page = client
            .fetch_paginated(1, 10, &opts, |p| keys::user::orders(Some(p)), orders_page)
            .await
            .unwrap();
        settle().await;

        assert_eq!(page.page, 1);
        let next = client.get_query_data::<Page>(&keys::user::orders(Some(2)));
        assert_eq!(next.map(|p| p.page), Some(2));
        assert!(!client.contains(&keys::user::orders(Some(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_page_does_not_prefetch() {
        let client = client();
        let opts = options(60, 300);

        client
            .fetch_paginated(3, 10, &opts, |p| keys::user::orders(Some(p)), orders_page)
            .await
            .unwrap();
        settle().await;

        assert!(!client.contains(&keys::user::orders(Some(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_snapshot_restores() {
        let client = client();
        let key = keys::cart::count();
        client.set_query_data(&key, 1u32);

        let snapshot = client.apply_optimistic::<u32, _>(&key, |n| n.copied().unwrap_or(0) + 5);
        assert_eq!(client.get_query_data::<u32>(&key), Some(6));

        client.restore(snapshot);
        assert_eq!(client.get_query_data::<u32>(&key), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_clears_in_flight_flag() {
        let client = client();
        let key = keys::products::detail("slow");
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, QueryError>(1u32)
        };

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            client.fetch_query(&key, &options(60, 300), slow),
        )
        .await;

        assert!(result.is_err());
        assert!(!client.query_state::<u32>(&key).is_fetching);
    }

    /// Fetcher that sleeps before resolving to its call number, or to a
    /// network error when `fail` is set.
    fn slow(
        calls: &Arc<AtomicU32>,
        fail: bool,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Clone + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if fail {
                    Err(QueryError::Network("offline".into()))
                } else {
                    Ok(n)
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_during_prefetch_shares_the_fetch() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300);

        let warm = {
            let (client, key, opts, fetcher) = (client.clone(), key.clone(), opts.clone(), slow(&calls, false));
            tokio::spawn(async move { client.prefetch_query(&key, &opts, fetcher).await })
        };
        settle().await;
        assert!(client.query_state::<u32>(&key).is_loading);

        assert_eq!(client.fetch_query(&key, &opts, slow(&calls, false)).await, Ok(1));
        warm.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_failure() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::cart::current();
        let opts = options(60, 300).with_retry(RetryPolicy::none());

        let (first, second) = tokio::join!(
            client.fetch_query(&key, &opts, slow(&calls, true)),
            client.fetch_query(&key, &opts, slow(&calls, true)),
        );

        assert_eq!(first, Err(QueryError::Network("offline".into())));
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_refetches_when_first_fetch_is_dropped() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let key = keys::products::detail("tee");
        let opts = options(60, 300);

        let abandoned = {
            let (client, key, opts, fetcher) = (client.clone(), key.clone(), opts.clone(), slow(&calls, false));
            tokio::spawn(async move { client.fetch_query(&key, &opts, fetcher).await })
        };
        settle().await;

        let read = {
            let (client, key, opts, fetcher) = (client.clone(), key.clone(), opts.clone(), slow(&calls, false));
            tokio::spawn(async move { client.fetch_query(&key, &opts, fetcher).await })
        };
        settle().await;
        abandoned.abort();

        assert_eq!(read.await.unwrap(), Ok(1));
        assert!(!client.query_state::<u32>(&key).is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_collect_drops_old_entries() {
        let client = client();
        let opts = options(10, 60);
        let calls = Arc::new(AtomicU32::new(0));

        client
            .fetch_query(&keys::products::detail("old"), &opts, counter(&calls))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        client
            .fetch_query(&keys::products::detail("new"), &opts, counter(&calls))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(client.garbage_collect(), 1);
        assert!(client.contains(&keys::products::detail("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_queries_by_prefix() {
        let client = client();
        client.set_query_data(&keys::user::profile(), 1u32);
        client.set_query_data(&keys::user::orders(Some(1)), 2u32);
        client.set_query_data(&keys::cart::current(), 3u32);

        assert_eq!(client.remove_queries(&keys::user::all()), 2);
        assert_eq!(client.len(), 1);
    }
}
