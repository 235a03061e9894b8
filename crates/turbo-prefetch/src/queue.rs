//! Priority prefetch queue.
//!
//! A pure state machine: callers pass the current time in, nothing here
//! sleeps or spawns. [`PrefetchScheduler`](crate::PrefetchScheduler) drives
//! it with real timers.
//!
//! Task lifecycle: `Queued -> Dispatching -> Fulfilled | Failed -> removed`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use turbo_cache::Timestamp;

use crate::error::PrefetchError;

/// Which link relation a dispatched task becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintKind {
    /// Low priority fetch for a likely next navigation.
    #[default]
    Prefetch,
    /// High priority fetch for the current navigation.
    Preload,
}

impl HintKind {
    /// The `rel` attribute value.
    pub fn rel(&self) -> &'static str {
        match self {
            Self::Prefetch => "prefetch",
            Self::Preload => "preload",
        }
    }
}

impl fmt::Display for HintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rel())
    }
}

/// A queued prefetch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchTask {
    pub href: String,
    /// Higher runs first.
    pub priority: i32,
    /// When the task was last enqueued.
    pub timestamp: Timestamp,
    pub kind: HintKind,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Dispatching,
    Fulfilled,
    Failed(String),
}

/// Result of [`PrefetchQueue::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new task was queued.
    Enqueued,
    /// An already queued task took the new priority and timestamp.
    Updated,
    /// The href is being dispatched right now; the add was ignored.
    InFlight,
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks dispatched per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum gap between the end of one pass and the start of the next.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_batch_size() -> usize {
    3
}

fn default_cooldown_ms() -> u64 {
    100
}

impl QueueConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Summary of one finished dispatch pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Final status per dispatched href, in dispatch order.
    pub outcomes: Vec<(String, TaskStatus)>,
    /// Tasks still queued after the pass.
    pub remaining: usize,
}

impl BatchReport {
    pub fn dispatched(&self) -> usize {
        self.outcomes.len()
    }

    pub fn fulfilled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, s)| *s == TaskStatus::Fulfilled)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.dispatched() - self.fulfilled()
    }
}

/// Deduplicating priority queue with batching and cooldown.
#[derive(Debug, Default)]
pub struct PrefetchQueue {
    config: QueueConfig,
    /// Sorted by priority, then recency, highest first.
    tasks: Vec<PrefetchTask>,
    dispatching: HashSet<String>,
    processing: bool,
    last_processed_at: Option<Timestamp>,
}

impl PrefetchQueue {
    /// Create an empty queue. A batch size of zero is treated as one.
    pub fn new(mut config: QueueConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Queue `href`, or move an already queued `href` to the new priority.
    pub fn add(&mut self, href: &str, priority: i32, kind: HintKind, now: Timestamp) -> AddOutcome {
        if self.dispatching.contains(href) {
            return AddOutcome::InFlight;
        }

        let outcome = match self.tasks.iter_mut().find(|t| t.href == href) {
            Some(task) => {
                task.priority = priority;
                task.timestamp = now;
                task.kind = kind;
                AddOutcome::Updated
            }
            None => {
                self.tasks.push(PrefetchTask {
                    href: href.to_string(),
                    priority,
                    timestamp: now,
                    kind,
                });
                AddOutcome::Enqueued
            }
        };

        self.tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        outcome
    }

    /// Take the next batch if a pass may start now.
    ///
    /// Returns `None` while a pass is running, while the cooldown since the
    /// last pass has not elapsed, or when nothing is queued.
    pub fn begin_batch(&mut self, now: Timestamp) -> Option<Vec<PrefetchTask>> {
        if self.processing || self.tasks.is_empty() || !self.cooldown_elapsed(now) {
            return None;
        }

        let take = self.config.batch_size.min(self.tasks.len());
        let batch: Vec<PrefetchTask> = self.tasks.drain(..take).collect();
        for task in &batch {
            self.dispatching.insert(task.href.clone());
        }
        self.processing = true;
        Some(batch)
    }

    /// Record the outcome of the running pass and start the cooldown.
    pub fn finish_batch(
        &mut self,
        outcomes: Vec<(String, Result<(), PrefetchError>)>,
        now: Timestamp,
    ) -> BatchReport {
        let outcomes = outcomes
            .into_iter()
            .map(|(href, result)| {
                self.dispatching.remove(&href);
                let status = match result {
                    Ok(()) => TaskStatus::Fulfilled,
                    Err(e) => TaskStatus::Failed(e.to_string()),
                };
                (href, status)
            })
            .collect();

        // Anything the caller did not report is no longer in flight either.
        self.dispatching.clear();
        self.processing = false;
        self.last_processed_at = Some(now);

        BatchReport {
            outcomes,
            remaining: self.tasks.len(),
        }
    }

    /// Earliest time the next pass may start, if one is needed.
    pub fn next_ready_at(&self) -> Option<Timestamp> {
        if self.processing || self.tasks.is_empty() {
            return None;
        }
        Some(match self.last_processed_at {
            Some(last) => last.saturating_add(self.config.cooldown()),
            None => Timestamp::ZERO,
        })
    }

    pub fn status(&self, href: &str) -> Option<TaskStatus> {
        if self.dispatching.contains(href) {
            Some(TaskStatus::Dispatching)
        } else if self.tasks.iter().any(|t| t.href == href) {
            Some(TaskStatus::Queued)
        } else {
            None
        }
    }

    /// Queued tasks in dispatch order.
    pub fn queued(&self) -> &[PrefetchTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Drop all queued tasks. A running pass is unaffected.
    pub fn clear(&mut self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        dropped
    }

    fn cooldown_elapsed(&self, now: Timestamp) -> bool {
        match self.last_processed_at {
            Some(last) => now.saturating_duration_since(last) >= self.config.cooldown(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn queue() -> PrefetchQueue {
        PrefetchQueue::new(QueueConfig::default())
    }

    fn hrefs(tasks: &[PrefetchTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.href.as_str()).collect()
    }

    #[test]
    fn test_duplicate_href_keeps_one_task_with_latest_priority() {
        let mut q = queue();
        assert_eq!(q.add("/products/tee", 1, HintKind::Prefetch, at(0)), AddOutcome::Enqueued);
        assert_eq!(q.add("/products/tee", 9, HintKind::Prefetch, at(5)), AddOutcome::Updated);

        assert_eq!(q.len(), 1);
        assert_eq!(q.queued()[0].priority, 9);
        assert_eq!(q.queued()[0].timestamp, at(5));
    }

    #[test]
    fn test_orders_by_priority_then_recency() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        q.add("/b", 5, HintKind::Prefetch, at(1));
        q.add("/c", 1, HintKind::Prefetch, at(2));
        q.add("/d", 3, HintKind::Prefetch, at(3));

        assert_eq!(hrefs(q.queued()), vec!["/b", "/d", "/c", "/a"]);
    }

    #[test]
    fn test_reinsert_moves_tie_to_front() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        q.add("/b", 1, HintKind::Prefetch, at(1));
        q.add("/a", 1, HintKind::Prefetch, at(2));

        assert_eq!(hrefs(q.queued()), vec!["/a", "/b"]);
    }

    #[test]
    fn test_batch_takes_highest_priority_first() {
        let mut q = queue();
        for (i, href) in ["/1", "/2", "/3", "/4", "/5"].iter().enumerate() {
            q.add(href, i as i32, HintKind::Prefetch, at(0));
        }

        let batch = q.begin_batch(at(0)).unwrap();
        assert_eq!(hrefs(&batch), vec!["/5", "/4", "/3"]);
        assert_eq!(q.status("/5"), Some(TaskStatus::Dispatching));
        assert_eq!(q.status("/1"), Some(TaskStatus::Queued));
    }

    #[test]
    fn test_no_second_batch_while_processing() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        q.add("/b", 1, HintKind::Prefetch, at(0));
        q.add("/c", 1, HintKind::Prefetch, at(0));
        q.add("/d", 1, HintKind::Prefetch, at(0));

        assert!(q.begin_batch(at(0)).is_some());
        assert!(q.begin_batch(at(500)).is_none());
        assert!(q.is_processing());
    }

    #[test]
    fn test_in_flight_href_is_not_requeued() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        let batch = q.begin_batch(at(0)).unwrap();

        assert_eq!(q.add("/a", 7, HintKind::Prefetch, at(1)), AddOutcome::InFlight);
        assert!(q.is_empty());

        let outcomes = batch.into_iter().map(|t| (t.href, Ok(()))).collect();
        q.finish_batch(outcomes, at(2));
        assert_eq!(q.add("/a", 7, HintKind::Prefetch, at(3)), AddOutcome::Enqueued);
    }

    #[test]
    fn test_cooldown_blocks_until_elapsed() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        let batch = q.begin_batch(at(0)).unwrap();
        q.finish_batch(batch.into_iter().map(|t| (t.href, Ok(()))).collect(), at(10));

        for n in 0..20 {
            q.add(&format!("/n{}", n), 1, HintKind::Prefetch, at(20 + n));
            assert!(q.begin_batch(at(20 + n)).is_none());
        }

        assert_eq!(q.next_ready_at(), Some(at(110)));
        assert!(q.begin_batch(at(109)).is_none());
        assert_eq!(q.begin_batch(at(110)).map(|b| b.len()), Some(3));
    }

    #[test]
    fn test_finish_reports_each_outcome() {
        let mut q = queue();
        q.add("/ok", 2, HintKind::Prefetch, at(0));
        q.add("/bad", 1, HintKind::Preload, at(0));
        q.begin_batch(at(0)).unwrap();

        let report = q.finish_batch(
            vec![
                ("/ok".to_string(), Ok(())),
                (
                    "/bad".to_string(),
                    Err(PrefetchError::Dispatch {
                        href: "/bad".into(),
                        reason: "offline".into(),
                    }),
                ),
            ],
            at(1),
        );

        assert_eq!(report.dispatched(), 2);
        assert_eq!(report.fulfilled(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(q.status("/bad"), None);
        assert!(!q.is_processing());
    }

    #[test]
    fn test_next_ready_at_without_history() {
        let mut q = queue();
        assert_eq!(q.next_ready_at(), None);
        q.add("/a", 1, HintKind::Prefetch, at(40));
        assert_eq!(q.next_ready_at(), Some(Timestamp::ZERO));
    }

    #[test]
    fn test_clear_drops_queued_tasks() {
        let mut q = queue();
        q.add("/a", 1, HintKind::Prefetch, at(0));
        q.add("/b", 1, HintKind::Prefetch, at(0));
        assert_eq!(q.clear(), 2);
        assert!(q.begin_batch(at(0)).is_none());
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: QueueConfig = serde_json::from_str(r#"{"batch_size": 5}"#).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.cooldown(), Duration::from_millis(100));
    }
}
