//! Next-route prediction.
//!
//! Candidates come from two places: static rules that encode storefront
//! structure (home leads to collections, a product leads back to
//! collections or home) and every route the session has visited. Static
//! rules keep predictions useful before any analytics exist.

use serde::{Deserialize, Serialize};

use crate::analytics::{normalize_route, AnalyticsLedger};
use crate::error::PrefetchError;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weights for the three analytics signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub click: f64,
    pub time: f64,
    pub scroll: f64,
}

impl ScoreWeights {
    /// Validated weights.
    pub fn new(click: f64, time: f64, scroll: f64) -> Result<Self, PrefetchError> {
        let weights = Self { click, time, scroll };
        weights.validate()?;
        Ok(weights)
    }

    /// Each weight must be finite and non-negative, and together they sum to 1.
    pub fn validate(&self) -> Result<(), PrefetchError> {
        let parts = [self.click, self.time, self.scroll];
        let valid = parts.iter().all(|w| w.is_finite() && *w >= 0.0)
            && (parts.iter().sum::<f64>() - 1.0).abs() < WEIGHT_TOLERANCE;
        if valid {
            Ok(())
        } else {
            Err(PrefetchError::InvalidWeights {
                click: self.click,
                time: self.time,
                scroll: self.scroll,
            })
        }
    }

    /// `clicks * click + minutes * time + scroll_fraction * scroll`.
    pub fn score(&self, clicks: u64, minutes: f64, scroll_fraction: f64) -> f64 {
        clicks as f64 * self.click + minutes * self.time + scroll_fraction * self.scroll
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            click: 0.4,
            time: 0.3,
            scroll: 0.3,
        }
    }
}

/// Which routes a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatch {
    Exact(String),
    Prefix(String),
}

/// A static "from here, users usually go there" rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub from: RouteMatch,
    pub targets: Vec<String>,
}

impl RouteRule {
    pub fn exact(route: &str, targets: &[&str]) -> Self {
        Self {
            from: RouteMatch::Exact(normalize_route(route)),
            targets: targets.iter().map(|t| normalize_route(t)).collect(),
        }
    }

    pub fn prefix(prefix: &str, targets: &[&str]) -> Self {
        Self {
            from: RouteMatch::Prefix(prefix.to_string()),
            targets: targets.iter().map(|t| normalize_route(t)).collect(),
        }
    }

    pub fn matches(&self, route: &str) -> bool {
        match &self.from {
            RouteMatch::Exact(r) => r == route,
            RouteMatch::Prefix(p) => route.starts_with(p.as_str()),
        }
    }
}

/// Storefront navigation rules.
pub fn default_rules() -> Vec<RouteRule> {
    vec![
        RouteRule::exact("/", &["/collections"]),
        RouteRule::prefix("/products/", &["/collections", "/"]),
        RouteRule::prefix("/collections/", &["/collections"]),
        RouteRule::exact("/cart", &["/collections"]),
    ]
}

/// Predictor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Maximum number of predictions returned.
    #[serde(default = "default_max_prefetch_distance")]
    pub max_prefetch_distance: usize,
    #[serde(default)]
    pub weights: ScoreWeights,
}

fn default_max_prefetch_distance() -> usize {
    3
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            max_prefetch_distance: default_max_prefetch_distance(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Rule,
    Analytics,
    Both,
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub route: String,
    pub score: f64,
    pub source: PredictionSource,
}

/// Scores candidate next routes.
#[derive(Debug, Clone)]
pub struct RoutePredictor {
    config: PredictorConfig,
    rules: Vec<RouteRule>,
}

impl RoutePredictor {
    /// Predictor with [`default_rules`]. Fails on invalid weights.
    pub fn new(config: PredictorConfig) -> Result<Self, PrefetchError> {
        config.weights.validate()?;
        Ok(Self {
            config,
            rules: default_rules(),
        })
    }

    /// Replace the static rules.
    pub fn with_rules(mut self, rules: Vec<RouteRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Rank next-route candidates for `current`, best first, at most
    /// `max_prefetch_distance` of them. Equal scores keep rule order, then
    /// lexical order of routes seen in analytics (visited or clicked).
    pub fn predict(&self, current: &str, ledger: &AnalyticsLedger) -> Vec<Prediction> {
        let current = normalize_route(current);
        let mut candidates: Vec<(String, PredictionSource)> = Vec::new();

        for rule in self.rules.iter().filter(|r| r.matches(&current)) {
            for target in &rule.targets {
                if *target != current && !candidates.iter().any(|(r, _)| r == target) {
                    candidates.push((target.clone(), PredictionSource::Rule));
                }
            }
        }

        for route in ledger.scored_routes() {
            if route == current {
                continue;
            }
            match candidates.iter_mut().find(|(r, _)| r.as_str() == route) {
                Some((_, source)) => *source = PredictionSource::Both,
                None => candidates.push((route.to_string(), PredictionSource::Analytics)),
            }
        }

        let mut predictions: Vec<Prediction> = candidates
            .into_iter()
            .map(|(route, source)| {
                let minutes = ledger.time_spent(&route).as_secs_f64() / 60.0;
                let score = self
                    .config
                    .weights
                    .score(ledger.clicks(&route), minutes, ledger.scroll_depth(&route));
                Prediction { route, score, source }
            })
            .collect();

        predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
        predictions.truncate(self.config.max_prefetch_distance);
        predictions
    }
}
