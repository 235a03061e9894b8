//! Clock abstraction and in-memory TTL cache for the TurboCommerce storefront.
//!
//! This crate provides:
//! - `Clock` - Injectable time source (`TokioClock`, `ManualClock`)
//! - `TtlCache` - Key/value cache with absolute expiry, used as an L1 in
//!   front of hot endpoints such as SEO metadata
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use turbo_cache::{TokioClock, TtlCache};
//!
//! let cache = TtlCache::new(TokioClock::shared());
//! cache.set("seo:/", meta, Duration::from_secs(300));
//!
//! // Expired entries read as a miss and are evicted.
//! let meta: Option<SeoMetadata> = cache.get("seo:/");
//! ```

mod clock;
mod ttl;

pub use clock::{Clock, ManualClock, Timestamp, TokioClock};
pub use ttl::{
    CacheEntry, TtlCache, TtlCacheConfig, TtlCacheStats, DEFAULT_CLEANUP_PROBABILITY, MIN_CLEANUP_INTERVAL,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{Clock, ManualClock, Timestamp, TokioClock, TtlCache};
}
