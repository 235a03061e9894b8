//! Prefetching for the TurboCommerce storefront.
//!
//! This crate provides:
//! - `PrefetchQueue` - Priority queue with batching and cooldown
//! - `PrefetchScheduler` - Async dispatch loop over the queue
//! - `HintRegistry` - Expiring `<link rel="prefetch">` hints
//! - `AnalyticsLedger` - Per-session navigation statistics
//! - `RoutePredictor` - Next-route ranking from rules and analytics
//! - `TriggerRegistry` - Visibility and hover triggers
//! - `PrefetchEngine` - All of the above behind one handle
//!
//! # Example
//!
//! ```rust,ignore
//! use turbo_prefetch::{PrefetchConfig, PrefetchEngine};
//!
//! let engine = PrefetchEngine::new(PrefetchConfig::default(), TokioClock::shared())?;
//! let _loop = engine.start();
//!
//! for prediction in engine.navigate("/products/tee") {
//!     println!("{} ({:.2})", prediction.route, prediction.score);
//! }
//! ```

mod analytics;
mod engine;
mod error;
mod hints;
mod predictor;
mod queue;
mod scheduler;
mod triggers;

pub use analytics::{normalize_route, AnalyticsLedger, AnalyticsSnapshot};
pub use engine::{PrefetchConfig, PrefetchEngine};
pub use error::PrefetchError;
pub use hints::{validate_href, HintRegistry, HintSink, LinkHint, PrefetchSink, DEFAULT_HINT_LIFETIME};
pub use predictor::{
    default_rules, Prediction, PredictionSource, PredictorConfig, RouteMatch, RoutePredictor,
    RouteRule, ScoreWeights,
};
pub use queue::{
    AddOutcome, BatchReport, HintKind, PrefetchQueue, PrefetchTask, QueueConfig, TaskStatus,
};
pub use scheduler::{PrefetchScheduler, SchedulerHandle};
pub use triggers::{
    ElementId, FireReason, Fired, TriggerRegistry, TriggerSpec, DEFAULT_HOVER_DELAY,
    DEFAULT_VISIBILITY_THRESHOLD,
};
