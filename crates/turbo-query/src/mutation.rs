//! Mutations with optimistic updates.
//!
//! A [`Mutation`] runs a write against the server. Before the write it can
//! patch cached entries so the view updates immediately. If the write fails
//! the patched entries are restored. Either way the affected keys are
//! invalidated afterwards so the cache converges on server state.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;

use crate::client::{QueryClient, Snapshot};
use crate::error::QueryError;
use crate::key::QueryKey;

type MutationFn<I, R> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync>;
type OptimisticFn<I> = Arc<dyn Fn(&QueryClient, &I) -> Snapshot + Send + Sync>;

/// A reusable server write.
///
/// # Example
///
/// ```rust,ignore
/// let add = Mutation::new(&client, move |item: CartItem| api.add_to_cart(item))
///     .with_optimistic_update(|_| keys::cart::current(), |cart: Option<&Cart>, item| {
///         cart.cloned().unwrap_or_default().with_item(item.clone())
///     })
///     .invalidates(keys::cart::all());
///
/// add.mutate_async(item).await?;
/// ```
pub struct Mutation<I, R> {
    client: QueryClient,
    mutation_fn: MutationFn<I, R>,
    optimistic: Vec<OptimisticFn<I>>,
    invalidates: Vec<QueryKey>,
    pending: Arc<AtomicUsize>,
}

impl<I, R> Clone for Mutation<I, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mutation_fn: Arc::clone(&self.mutation_fn),
            optimistic: self.optimistic.clone(),
            invalidates: self.invalidates.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<I, R> fmt::Debug for Mutation<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("optimistic_updates", &self.optimistic.len())
            .field("invalidates", &self.invalidates)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl<I, R> Mutation<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(client: &QueryClient, mutation_fn: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
    {
        Self {
            client: client.clone(),
            mutation_fn: Arc::new(move |input| mutation_fn(input).boxed()),
            optimistic: Vec::new(),
            invalidates: Vec::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Patch the entry at `key_fn(input)` before the write is sent.
    pub fn with_optimistic_update<T, K, U>(mut self, key_fn: K, update: U) -> Self
    where
        T: Clone + Send + Sync + 'static,
        K: Fn(&I) -> QueryKey + Send + Sync + 'static,
        U: Fn(Option<&T>, &I) -> T + Send + Sync + 'static,
    {
        self.optimistic.push(Arc::new(move |client: &QueryClient, input: &I| {
            let key = key_fn(input);
            client.apply_optimistic::<T, _>(&key, |current| update(current, input))
        }));
        self
    }

    /// Invalidate everything under `prefix` once the write settles.
    pub fn invalidates(mut self, prefix: QueryKey) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// Whether any call to this mutation is still running.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Run the write and wait for it, including the refetch of invalidated
    /// keys.
    pub async fn mutate_async(&self, input: I) -> Result<R, QueryError> {
        let _pending = PendingGuard::new(Arc::clone(&self.pending));

        let snapshots: Vec<Snapshot> = self
            .optimistic
            .iter()
            .map(|apply| apply(&self.client, &input))
            .collect();

        let touched: Vec<QueryKey> = snapshots.iter().map(|s| s.key.clone()).collect();
        let result = (self.mutation_fn)(input).await;

        if let Err(error) = &result {
            tracing::warn!(error = %error, rolled_back = snapshots.len(), "mutation failed");
            for snapshot in snapshots.into_iter().rev() {
                self.client.restore(snapshot);
            }
        }

        for prefix in self.settle_scope(touched) {
            self.client.invalidate_queries(&prefix).await;
        }

        result
    }

    /// Fire and forget. Errors are logged.
    pub fn mutate(&self, input: I) -> JoinHandle<()> {
        let mutation = self.clone();
        tokio::spawn(async move {
            if let Err(error) = mutation.mutate_async(input).await {
                tracing::debug!(error = %error, "background mutation failed");
            }
        })
    }

    /// Declared prefixes plus any optimistically patched key they miss.
    fn settle_scope(&self, touched: Vec<QueryKey>) -> Vec<QueryKey> {
        let mut scope = self.invalidates.clone();
        for key in touched {
            if !scope.iter().any(|prefix| prefix.is_prefix_of(&key)) {
                scope.push(key);
            }
        }
        scope
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::options::QueryOptions;
    use crate::retry::RetryPolicy;
    use parking_lot::Mutex;
    use std::time::Duration;
    use turbo_cache::TokioClock;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Cart {
        items: Vec<String>,
    }

    /// Server-side cart the fetchers and writes talk to.
    #[derive(Clone, Default)]
    struct Server {
        cart: Arc<Mutex<Cart>>,
        reject_writes: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Server {
        fn fetch(&self) -> impl Fn() -> futures::future::Ready<Result<Cart, QueryError>> + Send + Sync + 'static {
            let cart = Arc::clone(&self.cart);
            move || futures::future::ready(Ok(cart.lock().clone()))
        }

        fn add(&self, item: String) -> futures::future::Ready<Result<(), QueryError>> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return futures::future::ready(Err(QueryError::from_status(409, "out of stock")));
            }
            self.cart.lock().items.push(item);
            futures::future::ready(Ok(()))
        }
    }

    fn cart_options() -> QueryOptions {
        QueryOptions::new(Duration::from_secs(60), Duration::from_secs(300)).with_retry(RetryPolicy::none())
    }

    fn add_to_cart(client: &QueryClient, server: &Server) -> Mutation<String, ()> {
        let s = server.clone();
        Mutation::new(client, move |item: String| s.add(item))
            .with_optimistic_update(
                |_| keys::cart::current(),
                |cart: Option<&Cart>, item: &String| {
                    let mut next = cart.cloned().unwrap_or_default();
                    next.items.push(item.clone());
                    next
                },
            )
            .invalidates(keys::cart::all())
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_mutation_converges_on_server() {
        let client = QueryClient::new(TokioClock::shared(), QueryOptions::default());
        let server = Server::default();
        client
            .fetch_query(&keys::cart::current(), &cart_options(), server.fetch())
            .await
            .unwrap();

        add_to_cart(&client, &server).mutate_async("tee".into()).await.unwrap();

        let cart = client.get_query_data::<Cart>(&keys::cart::current());
        assert_eq!(cart, Some(Cart { items: vec!["tee".into()] }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_mutation_rolls_back_then_refetches() {
        let client = QueryClient::new(TokioClock::shared(), QueryOptions::default());
        let server = Server::default();
        client
            .fetch_query(&keys::cart::current(), &cart_options(), server.fetch())
            .await
            .unwrap();

        // Another device changes the cart while ours is in flight.
        server.cart.lock().items.push("hat".into());
        server.reject_writes.store(true, Ordering::SeqCst);

        let result = add_to_cart(&client, &server).mutate_async("tee".into()).await;

        assert!(matches!(result, Err(QueryError::Client { .. })));
        let cart = client.get_query_data::<Cart>(&keys::cart::current());
        assert_eq!(cart, Some(Cart { items: vec!["hat".into()] }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_value_visible_while_pending() {
        let client = QueryClient::new(TokioClock::shared(), QueryOptions::default());
        client.set_query_data(&keys::cart::count(), 1u32);

        let mutation = Mutation::new(&client, |_: u32| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err::<(), _>(QueryError::Network("timeout".into()))
        })
        .with_optimistic_update(|_| keys::cart::count(), |n: Option<&u32>, add: &u32| n.copied().unwrap_or(0) + add);

        let handle = mutation.mutate(2);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(mutation.is_pending());
        assert_eq!(client.get_query_data::<u32>(&keys::cart::count()), Some(3));

        handle.await.unwrap();
        assert!(!mutation.is_pending());
        assert_eq!(client.get_query_data::<u32>(&keys::cart::count()), Some(1));
    }

    #[test]
    fn test_settle_scope_adds_uncovered_keys() {
        let client = QueryClient::new(Arc::new(turbo_cache::ManualClock::new()), QueryOptions::default());
        let mutation: Mutation<u32, ()> =
            Mutation::new(&client, |_: u32| futures::future::ready(Ok(()))).invalidates(keys::cart::all());

        let scope = mutation.settle_scope(vec![keys::cart::current(), keys::user::profile()]);
        assert_eq!(scope, vec![keys::cart::all(), keys::user::profile()]);
    }
}
