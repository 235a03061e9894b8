//! Async driver for the prefetch queue.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use turbo_cache::Clock;

use crate::error::PrefetchError;
use crate::hints::PrefetchSink;
use crate::queue::{AddOutcome, BatchReport, HintKind, PrefetchQueue, PrefetchTask, QueueConfig, TaskStatus};

/// Runs dispatch passes over a [`PrefetchQueue`].
///
/// Each pass sends up to `batch_size` tasks to the sink concurrently and
/// waits for all of them. A failed task never cancels its siblings and
/// never propagates past the scheduler.
pub struct PrefetchScheduler {
    queue: Mutex<PrefetchQueue>,
    sink: Arc<dyn PrefetchSink>,
    clock: Arc<dyn Clock>,
    wake: Notify,
}

impl PrefetchScheduler {
    pub fn new(config: QueueConfig, sink: Arc<dyn PrefetchSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(PrefetchQueue::new(config)),
            sink,
            clock,
            wake: Notify::new(),
        }
    }

    /// Queue `href` and wake the dispatch loop.
    pub fn add(&self, href: &str, priority: i32, kind: HintKind) -> AddOutcome {
        let outcome = self
            .queue
            .lock()
            .add(href, priority, kind, self.clock.now());
        if outcome != AddOutcome::InFlight {
            self.wake.notify_one();
        }
        tracing::trace!(href, priority, ?outcome, "prefetch queued");
        outcome
    }

    /// Run one pass if the queue allows it.
    pub async fn process_once(&self) -> Option<BatchReport> {
        let batch = self.queue.lock().begin_batch(self.clock.now())?;

        let outcomes = join_all(batch.iter().map(|task| self.dispatch(task))).await;
        let report = self.queue.lock().finish_batch(outcomes, self.clock.now());

        tracing::debug!(
            dispatched = report.dispatched(),
            failed = report.failed(),
            remaining = report.remaining,
            "prefetch batch processed"
        );
        Some(report)
    }

    async fn dispatch(&self, task: &PrefetchTask) -> (String, Result<(), PrefetchError>) {
        let result = self.sink.dispatch(task).await;
        if let Err(error) = &result {
            tracing::debug!(href = %task.href, error = %error, "prefetch failed");
        }
        (task.href.clone(), result)
    }

    /// Start the dispatch loop. It wakes on every add and whenever the
    /// cooldown ends with work still queued. Dropping the handle stops it.
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        let scheduler = Arc::clone(self);
        SchedulerHandle {
            handle: tokio::spawn(async move { scheduler.run().await }),
        }
    }

    async fn run(&self) {
        loop {
            if self.process_once().await.is_some() {
                continue;
            }

            let next = self.queue.lock().next_ready_at();
            match next {
                Some(at) => {
                    let delay = at.saturating_duration_since(self.clock.now());
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }

    pub fn status(&self, href: &str) -> Option<TaskStatus> {
        self.queue.lock().status(href)
    }

    /// Queued tasks in dispatch order.
    pub fn queued(&self) -> Vec<PrefetchTask> {
        self.queue.lock().queued().to_vec()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop all queued tasks.
    pub fn clear(&self) -> usize {
        self.queue.lock().clear()
    }
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("queue", &*self.queue.lock())
            .finish()
    }
}

/// Owns the dispatch loop task.
#[derive(Debug)]
pub struct SchedulerHandle {
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop.
    pub fn shutdown(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
