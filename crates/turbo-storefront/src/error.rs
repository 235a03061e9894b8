//! Storefront error types.

use thiserror::Error;
use turbo_prefetch::PrefetchError;
use turbo_query::QueryError;

use crate::config::ConfigError;

/// Errors surfaced by the storefront layer.
#[derive(Error, Debug)]
pub enum StorefrontError {
    /// The href does not name a storefront page.
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    /// A primary query or mutation failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Prefetch(#[from] PrefetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP transport could not be built.
    #[error("Transport error: {0}")]
    Transport(String),
}
