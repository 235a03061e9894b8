//! Typed storefront queries.
//!
//! Every read goes through the [`QueryClient`] under a key from
//! [`turbo_query::keys`], so views asking for the same data share one cache
//! entry and mutations can invalidate by prefix.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use turbo_query::{
    keys, ProductFilters, QueryClient, QueryDefaults, QueryError, QueryKey, QueryOptions, SearchFilters,
};

use crate::ids::OrderId;
use crate::models::{
    Cart, Collection, Order, OrderPage, Product, ProductPage, SearchResults, UserProfile,
};
use crate::routes::Route;
use crate::transport::Transport;

/// Decode the JSON document at `path`.
pub(crate) async fn get_decoded<T: DeserializeOwned>(
    transport: &dyn Transport,
    path: &str,
    query: &[(String, String)],
) -> Result<T, QueryError> {
    let value = transport.get_json(path, query).await?;
    Ok(serde_json::from_value(value)?)
}

fn product_query(filters: &ProductFilters) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(category) = filters.normalized_category() {
        query.push(("category".to_string(), category.to_string()));
    }
    if let Some(page) = filters.page {
        query.push(("page".to_string(), page.to_string()));
    }
    if let Some(limit) = filters.limit {
        query.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(search) = filters.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query.push(("search".to_string(), search.to_string()));
    }
    if let Some(sort) = filters.sort.as_deref().filter(|s| !s.trim().is_empty()) {
        query.push(("sort".to_string(), sort.to_string()));
    }
    query
}

/// Typed reads against the storefront API.
#[derive(Clone)]
pub struct StorefrontApi {
    client: QueryClient,
    transport: Arc<dyn Transport>,
    defaults: QueryDefaults,
    page_size: u32,
}

impl StorefrontApi {
    pub fn new(
        client: QueryClient,
        transport: Arc<dyn Transport>,
        defaults: QueryDefaults,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            transport,
            defaults,
            page_size: page_size.max(1),
        }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn options(&self, preset: QueryOptions) -> QueryOptions {
        self.defaults.apply(preset)
    }

    /// Fetcher that GETs `path` and decodes it as `T`.
    fn fetcher<T>(
        &self,
        path: String,
        query: Vec<(String, String)>,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        move || {
            let transport = Arc::clone(&transport);
            let path = path.clone();
            let query = query.clone();
            async move { get_decoded(transport.as_ref(), &path, &query).await }.boxed()
        }
    }

    /// Filters with the page and limit this API lists with.
    fn paged(&self, filters: &ProductFilters, page: u32) -> ProductFilters {
        let limit = filters.limit.unwrap_or(self.page_size);
        filters.clone().page(page).limit(limit)
    }

    /// One page of products. A full page with more to come prefetches the
    /// next one.
    pub async fn products(&self, filters: &ProductFilters) -> Result<ProductPage, QueryError> {
        self.product_listing("/products".to_string(), None, filters).await
    }

    pub async fn product(&self, handle: &str) -> Result<Product, QueryError> {
        self.client
            .fetch_query(
                &keys::products::detail(handle),
                &self.options(QueryOptions::products()),
                self.fetcher(format!("/products/{}", handle), Vec::new()),
            )
            .await
    }

    pub async fn collections(&self) -> Result<Vec<Collection>, QueryError> {
        self.client
            .fetch_query(
                &keys::collections::list(None, None),
                &self.options(QueryOptions::collections()),
                self.fetcher("/collections".to_string(), Vec::new()),
            )
            .await
    }

    pub async fn collection(&self, handle: &str) -> Result<Collection, QueryError> {
        self.client
            .fetch_query(
                &keys::collections::detail(handle),
                &self.options(QueryOptions::collections()),
                self.fetcher(format!("/collections/{}", handle), Vec::new()),
            )
            .await
    }

    pub async fn collection_products(
        &self,
        handle: &str,
        filters: &ProductFilters,
    ) -> Result<ProductPage, QueryError> {
        self.product_listing(
            format!("/collections/{}/products", handle),
            Some(handle.to_string()),
            filters,
        )
        .await
    }

    async fn product_listing(
        &self,
        path: String,
        collection: Option<String>,
        filters: &ProductFilters,
    ) -> Result<ProductPage, QueryError> {
        let page = filters.page.unwrap_or(1);
        let base = self.paged(filters, page);
        let page_size = base.limit.unwrap_or(self.page_size) as usize;

        let key_base = base.clone();
        let key_for = move |p: u32| {
            let filters = key_base.clone().page(p);
            match &collection {
                Some(handle) => keys::collections::products(handle, &filters),
                None => keys::products::list(&filters),
            }
        };

        let transport = Arc::clone(&self.transport);
        let fetch_page = move |p: u32| {
            let transport = Arc::clone(&transport);
            let path = path.clone();
            let query = product_query(&base.clone().page(p));
            async move { get_decoded::<ProductPage>(transport.as_ref(), &path, &query).await }
        };

        self.client
            .fetch_paginated(
                page,
                page_size,
                &self.options(QueryOptions::products()),
                key_for,
                fetch_page,
            )
            .await
    }

    pub async fn cart(&self) -> Result<Cart, QueryError> {
        self.client
            .fetch_query(
                &keys::cart::current(),
                &self.options(QueryOptions::cart()),
                self.fetcher("/cart".to_string(), Vec::new()),
            )
            .await
    }

    pub async fn profile(&self) -> Result<UserProfile, QueryError> {
        self.client
            .fetch_query(
                &keys::user::profile(),
                &self.options(QueryOptions::user()),
                self.fetcher("/account".to_string(), Vec::new()),
            )
            .await
    }

    /// One page of order history, prefetching the next when full.
    pub async fn orders(&self, page: u32) -> Result<OrderPage, QueryError> {
        let page = page.max(1);
        let transport = Arc::clone(&self.transport);
        let limit = self.page_size;
        let fetch_page = move |p: u32| {
            let transport = Arc::clone(&transport);
            let query = vec![
                ("page".to_string(), p.to_string()),
                ("limit".to_string(), limit.to_string()),
            ];
            async move { get_decoded::<OrderPage>(transport.as_ref(), "/account/orders", &query).await }
        };

        self.client
            .fetch_paginated(
                page,
                limit as usize,
                &self.options(QueryOptions::user()),
                |p| keys::user::orders(Some(p)),
                fetch_page,
            )
            .await
    }

    pub async fn order(&self, id: &OrderId) -> Result<Order, QueryError> {
        self.client
            .fetch_query(
                &keys::user::order(id.as_str()),
                &self.options(QueryOptions::user()),
                self.fetcher(format!("/account/orders/{}", id), Vec::new()),
            )
            .await
    }

    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Result<SearchResults, QueryError> {
        let mut params = vec![("q".to_string(), query.trim().to_string())];
        params.extend(
            filters
                .to_params()
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        self.client
            .fetch_query(
                &keys::search::results(query, filters),
                &self.options(QueryOptions::search()),
                self.fetcher("/search".to_string(), params),
            )
            .await
    }

    pub async fn suggestions(&self, query: &str) -> Result<Vec<String>, QueryError> {
        self.client
            .fetch_query(
                &keys::search::suggestions(query),
                &self.options(QueryOptions::search()),
                self.fetcher(
                    "/search/suggestions".to_string(),
                    vec![("q".to_string(), query.trim().to_string())],
                ),
            )
            .await
    }

    /// Warm the primary data of `route`. Failures are logged and dropped.
    pub async fn prefetch_route(&self, route: &Route) {
        match route {
            Route::Home => {
                let filters = self.paged(&ProductFilters::new(), 1);
                join_all([
                    self.prefetch_products(filters),
                    self.prefetch(
                        keys::collections::list(None, None),
                        QueryOptions::collections(),
                        self.fetcher::<Vec<Collection>>("/collections".to_string(), Vec::new()),
                    ),
                ])
                .await;
            }
            Route::Collections => {
                self.prefetch(
                    keys::collections::list(None, None),
                    QueryOptions::collections(),
                    self.fetcher::<Vec<Collection>>("/collections".to_string(), Vec::new()),
                )
                .await;
            }
            Route::Collection { handle } => {
                let filters = self.paged(&ProductFilters::new(), 1);
                join_all([
                    self.prefetch(
                        keys::collections::detail(handle),
                        QueryOptions::collections(),
                        self.fetcher::<Collection>(format!("/collections/{}", handle), Vec::new()),
                    ),
                    self.prefetch(
                        keys::collections::products(handle, &filters),
                        QueryOptions::products(),
                        self.fetcher::<ProductPage>(
                            format!("/collections/{}/products", handle),
                            product_query(&filters),
                        ),
                    ),
                ])
                .await;
            }
            Route::Product { handle } => {
                self.prefetch(
                    keys::products::detail(handle),
                    QueryOptions::products(),
                    self.fetcher::<Product>(format!("/products/{}", handle), Vec::new()),
                )
                .await;
            }
            Route::Cart => {
                self.prefetch(
                    keys::cart::current(),
                    QueryOptions::cart(),
                    self.fetcher::<Cart>("/cart".to_string(), Vec::new()),
                )
                .await;
            }
            Route::Search { query } if query.is_empty() => {}
            Route::Search { query } => {
                let filters = SearchFilters::default();
                self.prefetch(
                    keys::search::results(query, &filters),
                    QueryOptions::search(),
                    self.fetcher::<SearchResults>(
                        "/search".to_string(),
                        vec![("q".to_string(), query.clone())],
                    ),
                )
                .await;
            }
            Route::Account => {
                self.prefetch(
                    keys::user::profile(),
                    QueryOptions::user(),
                    self.fetcher::<UserProfile>("/account".to_string(), Vec::new()),
                )
                .await;
            }
            Route::Orders => {
                let query = vec![
                    ("page".to_string(), "1".to_string()),
                    ("limit".to_string(), self.page_size.to_string()),
                ];
                self.prefetch(
                    keys::user::orders(Some(1)),
                    QueryOptions::user(),
                    self.fetcher::<OrderPage>("/account/orders".to_string(), query),
                )
                .await;
            }
        }
    }

    fn prefetch_products(&self, filters: ProductFilters) -> BoxFuture<'_, ()> {
        let key = keys::products::list(&filters);
        let fetcher = self.fetcher::<ProductPage>("/products".to_string(), product_query(&filters));
        self.prefetch(key, QueryOptions::products(), fetcher)
    }

    fn prefetch<T, F>(
        &self,
        key: QueryKey,
        preset: QueryOptions,
        fetcher: F,
    ) -> BoxFuture<'_, ()>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        let options = self.options(preset);
        async move { self.client.prefetch_query(&key, &options, fetcher).await }.boxed()
    }
}

impl std::fmt::Debug for StorefrontApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontApi")
            .field("client", &self.client)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_query_drops_all_category() {
        let filters = ProductFilters::new().category("all").page(2).limit(20).search(" ");
        assert_eq!(
            product_query(&filters),
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_product_query_keeps_real_filters() {
        let filters = ProductFilters::new().category("shirts").sort("price");
        let query = product_query(&filters);
        assert!(query.contains(&("category".to_string(), "shirts".to_string())));
        assert!(query.contains(&("sort".to_string(), "price".to_string())));
    }
}
