//! Key registry for storefront domains.
//!
//! Each domain builds its keys from one root so a shorter key is always an
//! ancestor of the longer ones: `products::all()` covers every product list
//! and detail, `products::lists()` every list regardless of filters.

use serde::{Deserialize, Serialize};

use crate::key::{Params, QueryKey};

/// Category value meaning "no category filter".
pub const ALL_CATEGORIES: &str = "all";

/// Filters for product listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilters {
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl ProductFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// The category filter with `"all"` and blanks folded into `None`.
    pub fn normalized_category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(ALL_CATEGORIES))
    }

    /// Canonical parameter set.
    pub fn to_params(&self) -> Params {
        Params::new()
            .with_opt("category", self.normalized_category())
            .with_opt("page", self.page)
            .with_opt("limit", self.limit)
            .with_opt("search", self.search.as_deref())
            .with_opt("sort", self.sort.as_deref())
    }
}

/// Filters for search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub page: Option<u32>,
    pub sort: Option<String>,
}

impl SearchFilters {
    pub fn to_params(&self) -> Params {
        let category = self
            .category
            .as_deref()
            .filter(|c| !c.trim().eq_ignore_ascii_case(ALL_CATEGORIES));
        Params::new()
            .with_opt("category", category)
            .with_opt("page", self.page)
            .with_opt("sort", self.sort.as_deref())
    }
}

pub mod products {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("products")
    }

    pub fn lists() -> QueryKey {
        all().segment("list")
    }

    pub fn list(filters: &ProductFilters) -> QueryKey {
        lists().params(filters.to_params())
    }

    pub fn details() -> QueryKey {
        all().segment("detail")
    }

    pub fn detail(handle: &str) -> QueryKey {
        details().segment(handle)
    }
}

pub mod collections {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("collections")
    }

    pub fn lists() -> QueryKey {
        all().segment("list")
    }

    pub fn list(page: Option<u32>, limit: Option<u32>) -> QueryKey {
        lists().params(
            Params::new()
                .with_opt("page", page)
                .with_opt("limit", limit),
        )
    }

    pub fn details() -> QueryKey {
        all().segment("detail")
    }

    pub fn detail(handle: &str) -> QueryKey {
        details().segment(handle)
    }

    /// Products within a collection. Lives under the collection's detail key.
    pub fn products(handle: &str, filters: &ProductFilters) -> QueryKey {
        detail(handle).segment("products").params(filters.to_params())
    }
}

pub mod cart {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("cart")
    }

    pub fn current() -> QueryKey {
        all().segment("current")
    }

    pub fn count() -> QueryKey {
        all().segment("count")
    }
}

pub mod user {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("user")
    }

    pub fn profile() -> QueryKey {
        all().segment("profile")
    }

    pub fn orders(page: Option<u32>) -> QueryKey {
        all()
            .segment("orders")
            .params(Params::new().with_opt("page", page))
    }

    pub fn order(id: &str) -> QueryKey {
        all().segment("order").segment(id)
    }

    pub fn wishlist() -> QueryKey {
        all().segment("wishlist")
    }
}

pub mod search {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("search")
    }

    pub fn results(query: &str, filters: &SearchFilters) -> QueryKey {
        all()
            .segment("results")
            .params(filters.to_params().with("q", query))
    }

    pub fn suggestions(query: &str) -> QueryKey {
        all()
            .segment("suggestions")
            .params(Params::new().with("q", query))
    }
}

/// Key sets to invalidate for each kind of mutation.
///
/// A scope must cover every key whose cached payload embeds the mutated
/// entity, not only the entity's own key.
pub mod invalidation {
    use super::*;

    /// A product changed: its detail, every list, collection listings and
    /// search results all embed product summaries.
    pub fn product_changed(handle: &str) -> Vec<QueryKey> {
        vec![
            products::detail(handle),
            products::lists(),
            collections::details(),
            search::all(),
        ]
    }

    /// The cart changed.
    pub fn cart_changed() -> Vec<QueryKey> {
        vec![cart::all()]
    }

    /// The signed-in user changed; the cart is user-scoped too.
    pub fn user_changed() -> Vec<QueryKey> {
        vec![user::all(), cart::all()]
    }
}
