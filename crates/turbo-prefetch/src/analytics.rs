//! Session analytics used for route prediction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turbo_cache::Timestamp;

use crate::error::PrefetchError;

/// Reduce an href to the route it names: the path without query or
/// fragment, and without a trailing slash except for the root.
pub fn normalize_route(href: &str) -> String {
    let path = href
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Per-session navigation statistics.
///
/// Every method takes an href and normalizes it, so `/products/tee?ref=x`
/// and `/products/tee/` count toward the same route.
#[derive(Debug, Default)]
pub struct AnalyticsLedger {
    visited: HashSet<String>,
    time_spent: HashMap<String, Duration>,
    clicks: HashMap<String, u64>,
    scroll_depth: HashMap<String, f64>,
    current: Option<(String, Timestamp)>,
}

impl AnalyticsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `href`. Time since the previous navigation is credited to the
    /// previous route.
    pub fn record_navigation(&mut self, href: &str, now: Timestamp) {
        let route = normalize_route(href);
        if let Some((previous, since)) = self.current.take() {
            *self.time_spent.entry(previous).or_default() += now.saturating_duration_since(since);
        }
        self.visited.insert(route.clone());
        self.current = Some((route, now));
    }

    /// Credit dwell time reported by a timing observer.
    pub fn record_dwell(&mut self, href: &str, dwell: Duration) {
        *self.time_spent.entry(normalize_route(href)).or_default() += dwell;
    }

    pub fn record_click(&mut self, href: &str) {
        *self.clicks.entry(normalize_route(href)).or_default() += 1;
    }

    /// Record how far down `href` was scrolled. Keeps the deepest value;
    /// fractions are clamped to `[0, 1]` and NaN is ignored.
    pub fn record_scroll(&mut self, href: &str, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let depth = self.scroll_depth.entry(normalize_route(href)).or_insert(0.0);
        if fraction > *depth {
            *depth = fraction;
        }
    }

    pub fn current_route(&self) -> Option<&str> {
        self.current.as_ref().map(|(route, _)| route.as_str())
    }

    pub fn has_visited(&self, href: &str) -> bool {
        self.visited.contains(&normalize_route(href))
    }

    /// Visited routes in lexical order.
    pub fn visited_routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.visited.iter().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    /// Routes with any navigation or click history, in lexical order.
    pub fn scored_routes(&self) -> Vec<&str> {
        let routes: BTreeSet<&str> = self
            .visited
            .iter()
            .chain(self.clicks.keys())
            .map(String::as_str)
            .collect();
        routes.into_iter().collect()
    }

    pub fn time_spent(&self, href: &str) -> Duration {
        self.time_spent
            .get(&normalize_route(href))
            .copied()
            .unwrap_or_default()
    }

    pub fn clicks(&self, href: &str) -> u64 {
        self.clicks.get(&normalize_route(href)).copied().unwrap_or(0)
    }

    pub fn scroll_depth(&self, href: &str) -> f64 {
        self.scroll_depth
            .get(&normalize_route(href))
            .copied()
            .unwrap_or(0.0)
    }

    /// Forget everything, including the current route.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Serializable copy of the ledger.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            captured_at: Utc::now(),
            current_route: self.current_route().map(str::to_string),
            visited_routes: self.visited.iter().cloned().collect(),
            time_spent_ms: self
                .time_spent
                .iter()
                .map(|(route, d)| (route.clone(), d.as_millis() as u64))
                .collect(),
            click_patterns: self.clicks.iter().map(|(r, c)| (r.clone(), *c)).collect(),
            scroll_depth: self
                .scroll_depth
                .iter()
                .map(|(r, d)| (r.clone(), *d))
                .collect(),
        }
    }

    /// Rebuild a ledger from a snapshot. The restored ledger has no current
    /// route, since the time spent on it cannot be known.
    pub fn restore(snapshot: AnalyticsSnapshot) -> Self {
        let mut ledger = Self {
            visited: snapshot.visited_routes.into_iter().collect(),
            time_spent: snapshot
                .time_spent_ms
                .into_iter()
                .map(|(route, ms)| (route, Duration::from_millis(ms)))
                .collect(),
            clicks: snapshot.click_patterns.into_iter().collect(),
            scroll_depth: HashMap::new(),
            current: None,
        };
        for (route, depth) in snapshot.scroll_depth {
            ledger.record_scroll(&route, depth);
        }
        ledger
    }
}

/// Serialized analytics, e.g. for `turbo predict --analytics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub current_route: Option<String>,
    #[serde(default)]
    pub visited_routes: BTreeSet<String>,
    #[serde(default)]
    pub time_spent_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub click_patterns: BTreeMap<String, u64>,
    #[serde(default)]
    pub scroll_depth: BTreeMap<String, f64>,
}

impl AnalyticsSnapshot {
    pub fn to_json(&self) -> Result<String, PrefetchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PrefetchError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("/products/tee?ref=home#top"), "/products/tee");
        assert_eq!(normalize_route("/collections/"), "/collections");
        assert_eq!(normalize_route(""), "/");
        assert_eq!(normalize_route("/"), "/");
        assert_eq!(normalize_route("cart"), "/cart");
    }

    #[test]
    fn test_navigation_credits_previous_route() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_navigation("/", at(0));
        ledger.record_navigation("/collections", at(90_000));
        ledger.record_navigation("/", at(120_000));

        assert_eq!(ledger.time_spent("/"), Duration::from_secs(90));
        assert_eq!(ledger.time_spent("/collections"), Duration::from_secs(30));
        assert_eq!(ledger.current_route(), Some("/"));
        assert_eq!(ledger.visited_routes(), vec!["/", "/collections"]);
    }

    #[test]
    fn test_scored_routes_include_clicks() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_navigation("/collections", at(0));
        ledger.record_click("/products/tee?ref=card");
        ledger.record_click("/collections");

        assert_eq!(ledger.scored_routes(), vec!["/collections", "/products/tee"]);
        assert_eq!(ledger.visited_routes(), vec!["/collections"]);
    }

    #[test]
    fn test_scroll_keeps_maximum_and_ignores_nan() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_scroll("/products/tee", 0.6);
        ledger.record_scroll("/products/tee", 0.2);
        ledger.record_scroll("/products/tee", f64::NAN);
        assert_eq!(ledger.scroll_depth("/products/tee"), 0.6);

        ledger.record_scroll("/products/tee", 7.0);
        assert_eq!(ledger.scroll_depth("/products/tee"), 1.0);
    }

    #[test]
    fn test_clicks_accumulate_per_route() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_click("/cart");
        ledger.record_click("/cart/");
        ledger.record_click("/cart?step=1");
        assert_eq!(ledger.clicks("/cart"), 3);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_navigation("/", at(0));
        ledger.record_click("/collections");
        ledger.clear();

        assert!(ledger.visited_routes().is_empty());
        assert_eq!(ledger.clicks("/collections"), 0);
        assert_eq!(ledger.current_route(), None);
    }

    #[test]
    fn test_snapshot_restore_keeps_statistics() {
        let mut ledger = AnalyticsLedger::new();
        ledger.record_navigation("/", at(0));
        ledger.record_navigation("/products/tee", at(60_000));
        ledger.record_click("/products/tee");
        ledger.record_scroll("/products/tee", 0.5);

        let json = ledger.snapshot().to_json().unwrap();
        let restored = AnalyticsLedger::restore(AnalyticsSnapshot::from_json(&json).unwrap());

        assert!(restored.has_visited("/products/tee"));
        assert_eq!(restored.time_spent("/"), Duration::from_secs(60));
        assert_eq!(restored.clicks("/products/tee"), 1);
        assert_eq!(restored.scroll_depth("/products/tee"), 0.5);
        assert_eq!(restored.current_route(), None);
    }

    #[test]
    fn test_snapshot_rejects_garbage() {
        assert!(matches!(
            AnalyticsSnapshot::from_json("{not json"),
            Err(PrefetchError::Snapshot(_))
        ));
    }
}
