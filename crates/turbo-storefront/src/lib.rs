//! Storefront data layer for TurboCommerce.
//!
//! This crate provides:
//! - `Storefront` - Composition root for one shopper session
//! - `StorefrontApi` - Typed, cached queries per storefront domain
//! - `CartMutations` - Optimistic cart writes with rollback
//! - `SeoService` - SEO metadata behind a TTL cache
//! - `Transport` - JSON transport seam, with `HttpTransport` over reqwest
//! - `Route` - Storefront page routes
//! - `StorefrontConfig` - TOML/JSON configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_storefront::{Storefront, StorefrontConfig};
//! use turbo_prefetch::{ElementId, TriggerSpec};
//!
//! let storefront = Storefront::from_config(StorefrontConfig::load_or_default(".")?)?;
//! let _tasks = storefront.start();
//!
//! // A product card scrolled into view warms the product page.
//! let card = ElementId::new(1);
//! storefront.register(card, TriggerSpec::new("/products/linen-shirt"));
//! storefront.on_visible(card, 0.5).await;
//! ```

mod api;
mod cart;
mod config;
mod error;
mod ids;
mod models;
mod routes;
mod seo;
mod storefront;
mod transport;

pub use api::StorefrontApi;
pub use cart::{CartMutations, QuantityUpdate};
pub use config::{ApiConfig, ConfigError, StorefrontConfig, CONFIG_FILE_NAMES};
pub use error::StorefrontError;
pub use ids::{CollectionId, OrderId, ProductId, UserId};
pub use models::{
    Cart, CartItem, CartItemKey, Collection, Money, Order, OrderPage, OrderStatus, Product,
    ProductPage, ProductSummary, SearchResults, SeoMetadata, UserProfile,
};
pub use routes::Route;
pub use seo::SeoService;
pub use storefront::{Storefront, StorefrontTasks, MANUAL_PREFETCH_PRIORITY};
pub use transport::{HttpTransport, Transport, API_PREFIX};
