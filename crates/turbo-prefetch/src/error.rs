//! Prefetch error types.

use thiserror::Error;

/// Errors raised inside the prefetch engine.
///
/// Dispatch failures are best-effort outcomes: the scheduler logs and
/// discards them. Only configuration and snapshot errors reach callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrefetchError {
    /// The href cannot be turned into a link hint.
    #[error("Invalid href: {0:?}")]
    InvalidHref(String),

    /// The sink failed to issue a hint.
    #[error("Prefetch of {href} failed: {reason}")]
    Dispatch { href: String, reason: String },

    /// Predictor weights are negative, not finite, or do not sum to 1.
    #[error("Score weights must be non-negative and sum to 1, got {click}/{time}/{scroll}")]
    InvalidWeights { click: f64, time: f64, scroll: f64 },

    /// An analytics snapshot could not be read or written.
    #[error("Analytics snapshot error: {0}")]
    Snapshot(String),
}

impl From<serde_json::Error> for PrefetchError {
    fn from(e: serde_json::Error) -> Self {
        PrefetchError::Snapshot(e.to_string())
    }
}
