//! SEO metadata behind the TTL cache.
//!
//! Metadata is requested on every page render and changes rarely, so it
//! lives in a [`TtlCache`] outside the query cache hierarchy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use turbo_cache::{Clock, TtlCache, TtlCacheConfig, TtlCacheStats};
use turbo_query::QueryError;

use crate::api::get_decoded;
use crate::models::SeoMetadata;
use crate::routes::Route;
use crate::transport::Transport;

/// Fetches and caches per-route SEO metadata.
pub struct SeoService {
    cache: Arc<TtlCache<SeoMetadata>>,
    transport: Arc<dyn Transport>,
    ttl: Duration,
    cleanup_interval: Duration,
    site_name: String,
}

impl SeoService {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: &TtlCacheConfig,
        site_name: impl Into<String>,
    ) -> Self {
        Self {
            cache: Arc::new(TtlCache::from_config(clock, config)),
            transport,
            ttl: config.default_ttl(),
            cleanup_interval: config.cleanup_interval(),
            site_name: site_name.into(),
        }
    }

    fn cache_key(route: &Route) -> String {
        format!("seo:{}", route.href())
    }

    /// Metadata for `route`, from cache when fresh. Fetch errors are
    /// returned and nothing is cached.
    pub async fn metadata(&self, route: &Route) -> Result<SeoMetadata, QueryError> {
        let query = vec![("path".to_string(), route.href())];
        self.cache
            .get_or_try_insert_with(&Self::cache_key(route), self.ttl, || async {
                tracing::debug!(route = %route, "fetching seo metadata");
                get_decoded(self.transport.as_ref(), "/seo", &query).await
            })
            .await
    }

    /// Metadata for `route`, or generated defaults when the API is
    /// unavailable.
    pub async fn metadata_or_default(&self, route: &Route) -> SeoMetadata {
        match self.metadata(route).await {
            Ok(meta) => meta,
            Err(error) => {
                tracing::warn!(route = %route, error = %error, "seo metadata unavailable, using defaults");
                self.fallback(route)
            }
        }
    }

    /// Metadata derived from the route alone.
    pub fn fallback(&self, route: &Route) -> SeoMetadata {
        let page = match route {
            Route::Home => None,
            Route::Collections => Some("Collections".to_string()),
            Route::Collection { handle } | Route::Product { handle } => Some(title_case(handle)),
            Route::Cart => Some("Cart".to_string()),
            Route::Search { query } if query.is_empty() => Some("Search".to_string()),
            Route::Search { query } => Some(format!("Search: {}", query)),
            Route::Account => Some("Account".to_string()),
            Route::Orders => Some("Orders".to_string()),
        };
        let title = match page {
            Some(page) => format!("{} | {}", page, self.site_name),
            None => self.site_name.clone(),
        };
        SeoMetadata {
            description: title.clone(),
            title,
            canonical_url: Some(route.href()),
            og_image: None,
            structured_data: None,
        }
    }

    pub fn invalidate(&self, route: &Route) -> bool {
        self.cache.delete(&Self::cache_key(route))
    }

    pub fn stats(&self) -> TtlCacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &Arc<TtlCache<SeoMetadata>> {
        &self.cache
    }

    /// Start the interval sweep of the metadata cache.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        self.cache.spawn_cleanup(self.cleanup_interval)
    }
}

impl std::fmt::Debug for SeoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeoService")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.len())
            .finish()
    }
}

/// `linen-shirt` becomes `Linen Shirt`.
fn title_case(handle: &str) -> String {
    handle
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
