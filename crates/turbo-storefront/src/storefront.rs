//! Composition root.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use turbo_cache::{Clock, TokioClock};
use turbo_prefetch::{ElementId, Fired, PrefetchEngine, Prediction, SchedulerHandle, TriggerSpec};
use turbo_query::QueryClient;

use crate::api::StorefrontApi;
use crate::cart::CartMutations;
use crate::config::StorefrontConfig;
use crate::error::StorefrontError;
use crate::routes::Route;
use crate::seo::SeoService;
use crate::transport::{HttpTransport, Transport};

/// Priority of an explicit [`Storefront::prefetch`].
pub const MANUAL_PREFETCH_PRIORITY: i32 = 20;

/// How often stale query entries are collected.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// One shopper session: query cache, cart writes, SEO cache and prefetch
/// engine built from one configuration.
///
/// # Example
///
/// ```rust,ignore
/// let storefront = Storefront::from_config(StorefrontConfig::load("turbo.toml")?)?;
/// let _tasks = storefront.start();
///
/// storefront.navigate("/products/linen-shirt")?;
/// let product = storefront.api().product("linen-shirt").await?;
/// ```
#[derive(Debug)]
pub struct Storefront {
    config: StorefrontConfig,
    clock: Arc<dyn Clock>,
    api: StorefrontApi,
    cart: CartMutations,
    seo: SeoService,
    prefetch: Arc<PrefetchEngine>,
}

impl Storefront {
    /// Storefront talking HTTP to `config.api.base_url`.
    pub fn from_config(config: StorefrontConfig) -> Result<Self, StorefrontError> {
        let transport = Arc::new(HttpTransport::from_config(&config.api)?);
        Self::new(config, transport)
    }

    pub fn new(config: StorefrontConfig, transport: Arc<dyn Transport>) -> Result<Self, StorefrontError> {
        Self::with_clock(config, transport, TokioClock::shared())
    }

    pub fn with_clock(
        config: StorefrontConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorefrontError> {
        config.validate()?;

        let client = QueryClient::new(Arc::clone(&clock), config.query.to_options());
        let api = StorefrontApi::new(
            client.clone(),
            Arc::clone(&transport),
            config.query.clone(),
            config.api.page_size,
        );
        let cart = CartMutations::new(&client, Arc::clone(&transport));
        let seo = SeoService::new(
            transport,
            Arc::clone(&clock),
            &config.seo_cache,
            config.site_name.clone(),
        );
        let prefetch = Arc::new(PrefetchEngine::new(config.prefetch.clone(), Arc::clone(&clock))?);

        tracing::debug!(base_url = %config.api.base_url, "storefront ready");
        Ok(Self {
            config,
            clock,
            api,
            cart,
            seo,
            prefetch,
        })
    }

    /// Start background work: the prefetch dispatch loop, the link hint
    /// and SEO cache sweeps, and query garbage collection. Dropping the
    /// returned value stops all of it.
    pub fn start(&self) -> StorefrontTasks {
        StorefrontTasks {
            _scheduler: self.prefetch.start(),
            hint_sweep: self
                .prefetch
                .spawn_hint_sweep(self.config.prefetch.hint_lifetime()),
            seo_sweep: self.seo.spawn_cleanup(),
            gc: self.api.client().spawn_garbage_collector(GC_INTERVAL),
        }
    }

    /// Record a navigation and warm the routes likely to follow.
    ///
    /// Predicted routes are queued as link hints and their data is
    /// prefetched in the background.
    pub fn navigate(&self, href: &str) -> Result<Vec<Prediction>, StorefrontError> {
        let route = Route::parse(href)?;
        let predictions = self.prefetch.navigate(&route.href());

        let routes: Vec<Route> = predictions
            .iter()
            .filter_map(|p| Route::parse(&p.route).ok())
            .collect();
        if !routes.is_empty() {
            let api = self.api.clone();
            tokio::spawn(async move {
                join_all(routes.iter().map(|r| api.prefetch_route(r))).await;
            });
        }

        Ok(predictions)
    }

    /// Queue a link hint for `href` and warm its data.
    pub async fn prefetch(&self, href: &str) -> Result<(), StorefrontError> {
        let route = Route::parse(href)?;
        self.prefetch.prefetch(&route.href(), MANUAL_PREFETCH_PRIORITY);
        self.api.prefetch_route(&route).await;
        Ok(())
    }

    /// Mount an element whose href should be prefetched when it shows up or
    /// is hovered.
    pub fn register(&self, id: ElementId, spec: TriggerSpec) {
        self.prefetch.register_trigger(id, spec);
    }

    pub fn unmount(&self, id: ElementId) -> bool {
        self.prefetch.unmount(id)
    }

    /// Report an element's visible fraction. A firing trigger queues its
    /// href and warms the route's data before returning.
    pub async fn on_visible(&self, id: ElementId, ratio: f64) -> Option<Fired> {
        let fired = self.prefetch.on_intersection(id, ratio)?;
        self.warm(&fired).await;
        Some(fired)
    }

    pub async fn on_hover_start(&self, id: ElementId) -> Option<Fired> {
        let fired = self.prefetch.on_hover_start(id)?;
        self.warm(&fired).await;
        Some(fired)
    }

    pub fn on_hover_end(&self, id: ElementId) {
        self.prefetch.on_hover_end(id);
    }

    /// Fire hovers whose delay has elapsed and warm their routes.
    pub async fn poll_hover(&self) -> Vec<Fired> {
        let fired = self.prefetch.poll_hover();
        join_all(fired.iter().map(|f| self.warm(f))).await;
        fired
    }

    async fn warm(&self, fired: &Fired) {
        match Route::parse(&fired.href) {
            Ok(route) => self.api.prefetch_route(&route).await,
            Err(_) => tracing::debug!(href = %fired.href, "trigger href is not a storefront route"),
        }
    }

    pub fn api(&self) -> &StorefrontApi {
        &self.api
    }

    pub fn client(&self) -> &QueryClient {
        self.api.client()
    }

    pub fn cart(&self) -> &CartMutations {
        &self.cart
    }

    pub fn seo(&self) -> &SeoService {
        &self.seo
    }

    pub fn engine(&self) -> &Arc<PrefetchEngine> {
        &self.prefetch
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Background tasks started by [`Storefront::start`].
#[derive(Debug)]
pub struct StorefrontTasks {
    _scheduler: SchedulerHandle,
    hint_sweep: JoinHandle<()>,
    seo_sweep: JoinHandle<()>,
    gc: JoinHandle<()>,
}

impl StorefrontTasks {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for StorefrontTasks {
    fn drop(&mut self) {
        self.hint_sweep.abort();
        self.seo_sweep.abort();
        self.gc.abort();
    }
}
