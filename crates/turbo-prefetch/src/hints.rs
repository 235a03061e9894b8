//! Link hints issued by the prefetch queue.
//!
//! Each dispatched task becomes a `<link rel="prefetch">` or
//! `<link rel="preload">` hint. Hints expire after a bounded lifetime so a
//! long session does not accumulate them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use turbo_cache::{Clock, Timestamp};

use crate::error::PrefetchError;
use crate::queue::{HintKind, PrefetchTask};

/// Default hint lifetime.
pub const DEFAULT_HINT_LIFETIME: Duration = Duration::from_secs(30);

/// One live link hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkHint {
    pub href: String,
    pub kind: HintKind,
    pub inserted_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LinkHint {
    /// HTML for this hint.
    pub fn to_html(&self) -> String {
        format!(
            r#"<link rel="{}" href="{}">"#,
            self.kind.rel(),
            html_escape(&self.href)
        )
    }
}

/// Live hints, oldest first.
#[derive(Debug)]
pub struct HintRegistry {
    lifetime: Duration,
    hints: Vec<LinkHint>,
}

impl HintRegistry {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            hints: Vec::new(),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Add a hint, replacing any live hint for the same href and kind.
    pub fn insert(&mut self, href: &str, kind: HintKind, now: Timestamp) {
        self.hints.retain(|h| !(h.href == href && h.kind == kind));
        self.hints.push(LinkHint {
            href: href.to_string(),
            kind,
            inserted_at: now,
            expires_at: now.saturating_add(self.lifetime),
        });
    }

    /// Remove expired hints. Returns how many were removed.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let before = self.hints.len();
        self.hints.retain(|h| now < h.expires_at);
        before - self.hints.len()
    }

    pub fn hints(&self) -> &[LinkHint] {
        &self.hints
    }

    pub fn contains(&self, href: &str) -> bool {
        self.hints.iter().any(|h| h.href == href)
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn clear(&mut self) {
        self.hints.clear();
    }

    /// All live hints as HTML, one per line.
    pub fn render(&self) -> String {
        self.hints
            .iter()
            .map(LinkHint::to_html)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for HintRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HINT_LIFETIME)
    }
}

/// Where dispatched tasks go.
#[async_trait]
pub trait PrefetchSink: Send + Sync {
    /// Issue one prefetch. Errors are logged by the caller and dropped.
    async fn dispatch(&self, task: &PrefetchTask) -> Result<(), PrefetchError>;
}

/// Sink that records tasks as link hints.
#[derive(Debug, Clone)]
pub struct HintSink {
    registry: Arc<Mutex<HintRegistry>>,
    clock: Arc<dyn Clock>,
}

impl HintSink {
    pub fn new(registry: Arc<Mutex<HintRegistry>>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    pub fn registry(&self) -> &Arc<Mutex<HintRegistry>> {
        &self.registry
    }
}

#[async_trait]
impl PrefetchSink for HintSink {
    async fn dispatch(&self, task: &PrefetchTask) -> Result<(), PrefetchError> {
        validate_href(&task.href)?;

        let now = self.clock.now();
        let mut registry = self.registry.lock();
        let expired = registry.sweep(now);
        registry.insert(&task.href, task.kind, now);

        tracing::trace!(href = %task.href, rel = task.kind.rel(), expired, "link hint inserted");
        Ok(())
    }
}

/// Accept same-origin paths and absolute http(s) URLs.
pub fn validate_href(href: &str) -> Result<(), PrefetchError> {
    let trimmed = href.trim();
    let ok = (trimmed.starts_with('/') && !trimmed.starts_with("//"))
        || trimmed.starts_with("https://")
        || trimmed.starts_with("http://");
    if ok && !trimmed.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(PrefetchError::InvalidHref(href.to_string()))
    }
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
