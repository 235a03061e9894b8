//! Prefetch engine facade.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use turbo_cache::{Clock, MIN_CLEANUP_INTERVAL};

use crate::analytics::{AnalyticsLedger, AnalyticsSnapshot};
use crate::error::PrefetchError;
use crate::hints::{HintRegistry, HintSink, LinkHint, PrefetchSink};
use crate::predictor::{Prediction, PredictorConfig, RoutePredictor};
use crate::queue::{AddOutcome, BatchReport, HintKind, QueueConfig};
use crate::scheduler::{PrefetchScheduler, SchedulerHandle};
use crate::triggers::{ElementId, Fired, TriggerRegistry, TriggerSpec};

/// Priority of the best prediction after a navigation. Lower ranks get
/// one less each.
const PREDICTION_BASE_PRIORITY: i32 = 10;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// How long a link hint stays on the page.
    #[serde(default = "default_hint_lifetime_ms")]
    pub hint_lifetime_ms: u64,
    /// Enqueue predicted routes on every navigation.
    #[serde(default = "default_predict_on_navigate")]
    pub predict_on_navigate: bool,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
}

fn default_hint_lifetime_ms() -> u64 {
    30_000
}

fn default_predict_on_navigate() -> bool {
    true
}

impl PrefetchConfig {
    pub fn hint_lifetime(&self) -> Duration {
        Duration::from_millis(self.hint_lifetime_ms)
    }

    pub fn validate(&self) -> Result<(), PrefetchError> {
        self.predictor.weights.validate()
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            hint_lifetime_ms: default_hint_lifetime_ms(),
            predict_on_navigate: default_predict_on_navigate(),
            queue: QueueConfig::default(),
            predictor: PredictorConfig::default(),
        }
    }
}

/// One object owning the queue, analytics, predictor and triggers of a
/// session.
///
/// # Example
///
/// ```rust,ignore
/// let engine = PrefetchEngine::new(PrefetchConfig::default(), TokioClock::shared())?;
/// let _loop = engine.start();
///
/// engine.register_trigger(ElementId::new(1), TriggerSpec::new("/products/tee"));
/// if let Some(fired) = engine.on_intersection(ElementId::new(1), 0.4) {
///     // queued; warm data for fired.href here
/// }
/// ```
#[derive(Debug)]
pub struct PrefetchEngine {
    config: PrefetchConfig,
    scheduler: Arc<PrefetchScheduler>,
    hints: Arc<Mutex<HintRegistry>>,
    ledger: Mutex<AnalyticsLedger>,
    predictor: RoutePredictor,
    triggers: Mutex<TriggerRegistry>,
    clock: Arc<dyn Clock>,
}

impl PrefetchEngine {
    /// Engine whose dispatched tasks become link hints.
    pub fn new(config: PrefetchConfig, clock: Arc<dyn Clock>) -> Result<Self, PrefetchError> {
        let hints = Arc::new(Mutex::new(HintRegistry::new(config.hint_lifetime())));
        let sink = Arc::new(HintSink::new(Arc::clone(&hints), Arc::clone(&clock)));
        Self::build(config, sink, hints, clock)
    }

    /// Engine dispatching to a custom sink. The hint registry stays empty
    /// unless the sink writes to it.
    pub fn with_sink(
        config: PrefetchConfig,
        sink: Arc<dyn PrefetchSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PrefetchError> {
        let hints = Arc::new(Mutex::new(HintRegistry::new(config.hint_lifetime())));
        Self::build(config, sink, hints, clock)
    }

    fn build(
        config: PrefetchConfig,
        sink: Arc<dyn PrefetchSink>,
        hints: Arc<Mutex<HintRegistry>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PrefetchError> {
        let predictor = RoutePredictor::new(config.predictor.clone())?;
        let scheduler = Arc::new(PrefetchScheduler::new(
            config.queue.clone(),
            sink,
            Arc::clone(&clock),
        ));
        Ok(Self {
            config,
            scheduler,
            hints,
            ledger: Mutex::new(AnalyticsLedger::new()),
            predictor,
            triggers: Mutex::new(TriggerRegistry::new()),
            clock,
        })
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Start the dispatch loop.
    pub fn start(&self) -> SchedulerHandle {
        self.scheduler.spawn()
    }

    /// Run one dispatch pass without the background loop.
    pub async fn process_once(&self) -> Option<BatchReport> {
        self.scheduler.process_once().await
    }

    pub fn scheduler(&self) -> &Arc<PrefetchScheduler> {
        &self.scheduler
    }

    /// Queue a prefetch hint.
    pub fn prefetch(&self, href: &str, priority: i32) -> AddOutcome {
        self.scheduler.add(href, priority, HintKind::Prefetch)
    }

    /// Queue a preload hint.
    pub fn preload(&self, href: &str, priority: i32) -> AddOutcome {
        self.scheduler.add(href, priority, HintKind::Preload)
    }

    /// Record a navigation and queue the predicted next routes.
    pub fn navigate(&self, href: &str) -> Vec<Prediction> {
        let now = self.clock.now();
        let predictions = {
            let mut ledger = self.ledger.lock();
            ledger.record_navigation(href, now);
            self.predictor.predict(href, &ledger)
        };

        if self.config.predict_on_navigate {
            for (rank, prediction) in predictions.iter().enumerate() {
                let priority = PREDICTION_BASE_PRIORITY.saturating_sub(rank as i32);
                self.scheduler.add(&prediction.route, priority, HintKind::Prefetch);
            }
        }

        tracing::debug!(href, predicted = predictions.len(), "navigation recorded");
        predictions
    }

    /// Predictions for `href` without recording anything.
    pub fn predict(&self, href: &str) -> Vec<Prediction> {
        self.predictor.predict(href, &self.ledger.lock())
    }

    pub fn record_click(&self, href: &str) {
        self.ledger.lock().record_click(href);
    }

    pub fn record_scroll(&self, href: &str, fraction: f64) {
        self.ledger.lock().record_scroll(href, fraction);
    }

    pub fn record_dwell(&self, href: &str, dwell: Duration) {
        self.ledger.lock().record_dwell(href, dwell);
    }

    pub fn register_trigger(&self, id: ElementId, spec: TriggerSpec) {
        self.triggers.lock().register(id, spec);
    }

    pub fn unmount(&self, id: ElementId) -> bool {
        self.triggers.lock().unmount(id)
    }

    /// Report visibility. A firing trigger is queued and returned so the
    /// caller can warm data for it.
    pub fn on_intersection(&self, id: ElementId, ratio: f64) -> Option<Fired> {
        let fired = self.triggers.lock().on_intersection(id, ratio)?;
        self.enqueue_fired(&fired);
        Some(fired)
    }

    pub fn on_hover_start(&self, id: ElementId) -> Option<Fired> {
        let fired = self
            .triggers
            .lock()
            .on_hover_start(id, self.clock.now())?;
        self.enqueue_fired(&fired);
        Some(fired)
    }

    pub fn on_hover_end(&self, id: ElementId) {
        self.triggers.lock().on_hover_end(id);
    }

    /// Fire hovers whose delay has elapsed.
    pub fn poll_hover(&self) -> Vec<Fired> {
        let fired = self.triggers.lock().poll_hover(self.clock.now());
        for f in &fired {
            self.enqueue_fired(f);
        }
        fired
    }

    /// Delay until the next pending hover is due.
    pub fn next_hover_in(&self) -> Option<Duration> {
        let deadline = self.triggers.lock().next_hover_deadline()?;
        Some(deadline.saturating_duration_since(self.clock.now()))
    }

    fn enqueue_fired(&self, fired: &Fired) {
        tracing::trace!(element = %fired.id, href = %fired.href, reason = ?fired.reason, "trigger fired");
        self.scheduler.add(&fired.href, fired.priority, fired.kind);
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.ledger.lock().snapshot()
    }

    pub fn restore_analytics(&self, snapshot: AnalyticsSnapshot) {
        *self.ledger.lock() = AnalyticsLedger::restore(snapshot);
    }

    pub fn clear_analytics(&self) {
        self.ledger.lock().clear();
    }

    /// Live link hints after dropping expired ones.
    pub fn hints(&self) -> Vec<LinkHint> {
        let mut hints = self.hints.lock();
        hints.sweep(self.clock.now());
        hints.hints().to_vec()
    }

    pub fn render_hints(&self) -> String {
        let mut hints = self.hints.lock();
        hints.sweep(self.clock.now());
        hints.render()
    }

    pub fn sweep_hints(&self) -> usize {
        self.hints.lock().sweep(self.clock.now())
    }

    /// Drop expired hints every `interval`, so the lifetime holds while
    /// nothing reads or dispatches. Stops once the engine is dropped.
    pub fn spawn_hint_sweep(&self, interval: Duration) -> JoinHandle<()> {
        let hints: Weak<Mutex<HintRegistry>> = Arc::downgrade(&self.hints);
        let clock = Arc::clone(&self.clock);
        let interval = interval.max(MIN_CLEANUP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(hints) = hints.upgrade() else {
                    tracing::debug!("prefetch engine dropped, stopping hint sweep");
                    break;
                };
                let removed = hints.lock().sweep(clock.now());
                if removed > 0 {
                    tracing::trace!(removed, "expired link hints removed");
                }
            }
        })
    }
}
