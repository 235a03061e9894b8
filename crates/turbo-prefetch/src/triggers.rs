//! Visibility and hover triggers.
//!
//! Views register elements with a [`TriggerSpec`]. The host reports
//! intersection ratios and hover transitions; the registry decides when an
//! element's prefetch fires. Each registration fires at most once.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use turbo_cache::Timestamp;

use crate::queue::HintKind;

/// Default fraction of an element that must be visible.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.1;

/// Default time a pointer must rest on an element.
pub const DEFAULT_HOVER_DELAY: Duration = Duration::from_millis(100);

/// Opaque identifier for a mounted element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(u64);

impl ElementId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el-{}", self.0)
    }
}

/// What to prefetch for an element, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub href: String,
    pub priority: i32,
    pub kind: HintKind,
    /// Fire once at least this fraction is visible.
    pub visibility_threshold: Option<f64>,
    /// Fire once hovered for this long.
    pub hover_delay: Option<Duration>,
}

impl TriggerSpec {
    /// Trigger on visibility with the default threshold.
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            priority: 0,
            kind: HintKind::Prefetch,
            visibility_threshold: Some(DEFAULT_VISIBILITY_THRESHOLD),
            hover_delay: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(mut self, kind: HintKind) -> Self {
        self.kind = kind;
        self
    }

    /// Fire on visibility. The threshold is clamped to `[0, 1]`.
    pub fn on_visible(mut self, threshold: f64) -> Self {
        self.visibility_threshold = Some(if threshold.is_nan() {
            DEFAULT_VISIBILITY_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        });
        self
    }

    pub fn on_hover(mut self, delay: Duration) -> Self {
        self.hover_delay = Some(delay);
        self
    }

    /// Hover only.
    pub fn without_visibility(mut self) -> Self {
        self.visibility_threshold = None;
        self
    }
}

/// Why a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FireReason {
    Visible,
    Hover,
}

/// A trigger that just fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub id: ElementId,
    pub href: String,
    pub priority: i32,
    pub kind: HintKind,
    pub reason: FireReason,
}

#[derive(Debug)]
struct TriggerState {
    spec: TriggerSpec,
    fired: bool,
    hover_since: Option<Timestamp>,
}

impl TriggerState {
    fn fire(&mut self, id: ElementId, reason: FireReason) -> Fired {
        self.fired = true;
        self.hover_since = None;
        Fired {
            id,
            href: self.spec.href.clone(),
            priority: self.spec.priority,
            kind: self.spec.kind,
            reason,
        }
    }
}

/// Mounted elements and their trigger state.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    triggers: HashMap<ElementId, TriggerState>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount an element. Registering an id again is a new mount and may
    /// fire again.
    pub fn register(&mut self, id: ElementId, spec: TriggerSpec) {
        self.triggers.insert(
            id,
            TriggerState {
                spec,
                fired: false,
                hover_since: None,
            },
        );
    }

    /// Unmount an element. Returns whether it was registered.
    pub fn unmount(&mut self, id: ElementId) -> bool {
        self.triggers.remove(&id).is_some()
    }

    /// Report the visible fraction of an element.
    pub fn on_intersection(&mut self, id: ElementId, ratio: f64) -> Option<Fired> {
        let state = self.triggers.get_mut(&id)?;
        let threshold = state.spec.visibility_threshold?;
        if state.fired || ratio.is_nan() || ratio <= 0.0 || ratio < threshold {
            return None;
        }
        Some(state.fire(id, FireReason::Visible))
    }

    /// Pointer entered an element. Fires immediately for a zero delay.
    pub fn on_hover_start(&mut self, id: ElementId, now: Timestamp) -> Option<Fired> {
        let state = self.triggers.get_mut(&id)?;
        let delay = state.spec.hover_delay?;
        if state.fired {
            return None;
        }
        if delay.is_zero() {
            return Some(state.fire(id, FireReason::Hover));
        }
        state.hover_since.get_or_insert(now);
        None
    }

    /// Pointer left an element before its delay elapsed.
    pub fn on_hover_end(&mut self, id: ElementId) {
        if let Some(state) = self.triggers.get_mut(&id) {
            state.hover_since = None;
        }
    }

    /// Fire every hover that has lasted its delay.
    pub fn poll_hover(&mut self, now: Timestamp) -> Vec<Fired> {
        let mut fired: Vec<Fired> = self
            .triggers
            .iter_mut()
            .filter_map(|(id, state)| {
                let since = state.hover_since?;
                let delay = state.spec.hover_delay?;
                (!state.fired && now.saturating_duration_since(since) >= delay)
                    .then(|| state.fire(*id, FireReason::Hover))
            })
            .collect();
        fired.sort_by_key(|f| f.id);
        fired
    }

    /// When the earliest pending hover will be due.
    pub fn next_hover_deadline(&self) -> Option<Timestamp> {
        self.triggers
            .values()
            .filter(|s| !s.fired)
            .filter_map(|s| Some(s.hover_since?.saturating_add(s.spec.hover_delay?)))
            .min()
    }

    pub fn has_fired(&self, id: ElementId) -> bool {
        self.triggers.get(&id).is_some_and(|s| s.fired)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }
}
