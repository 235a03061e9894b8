//! Stale-while-revalidate query cache for the TurboCommerce storefront.
//!
//! This crate provides:
//! - `QueryKey` - Canonical hierarchical cache keys
//! - `keys` - Key builders for each storefront domain
//! - `QueryClient` - SWR cache with retry, invalidation and prefetch
//! - `Mutation` - Server writes with optimistic updates and rollback
//! - `RequestWindow` - Cancellation of in-flight requests
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_query::{keys, QueryClient, QueryOptions};
//!
//! let client = QueryClient::default();
//! let filters = keys::ProductFilters::new().category("all").page(1).limit(20);
//!
//! // Same entry as the unfiltered first page.
//! let page = client
//!     .fetch_query(&keys::products::list(&filters), &QueryOptions::products(), move || {
//!         api.list_products(filters.clone())
//!     })
//!     .await?;
//! ```

mod client;
mod error;
mod key;
pub mod keys;
mod mutation;
mod options;
mod retry;
mod state;
mod window;

pub use client::{Paginated, QueryClient, QueryStats};
pub use error::QueryError;
pub use key::{KeyPart, ParamValue, Params, QueryKey};
pub use keys::{ProductFilters, SearchFilters};
pub use mutation::Mutation;
pub use options::{QueryDefaults, QueryOptions};
pub use retry::{BackoffStrategy, RetryPolicy, RetryPredicate, DEFAULT_MAX_RETRIES};
pub use state::{QueryState, QueryStatus};
pub use window::RequestWindow;
