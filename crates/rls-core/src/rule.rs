//! Rule model - the unit of rate-limiting policy.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limiter algorithm selected per rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

/// Long-horizon quotas. Values <= 0 disable the scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaLimits {
    pub per_minute: i64,
    pub per_hour: i64,
    pub per_day: i64,
}

impl QuotaLimits {
    /// Whether the atomic hour/day script has anything to enforce.
    pub fn enforced(&self) -> bool {
        self.per_hour > 0 || self.per_day > 0
    }
}

/// Per-(rule, dim) circuit breaker configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    pub enabled: bool,
    /// Rate-limit denials within the window required to trip open.
    pub rl_deny_threshold: i64,
    pub rl_deny_window_ms: i64,
    /// Minimum time the breaker stays open before probing.
    pub min_open_ms: i64,
    /// Share of dim keys sampled while half-open, 0-100.
    pub half_open_probe_percent: i64,
    pub half_open_min_pass: i64,
    pub half_open_max_fail: i64,
}

/// A single rate-limiting rule. Immutable once published.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub rule_id: String,
    /// Path pattern: literal, `prefix*`, or `*`/empty for any.
    #[serde(rename = "match")]
    pub match_path: String,
    /// HTTP verbs; empty matches any, `*` matches any.
    pub methods: Vec<String>,
    /// Client identity kind filter; empty matches any.
    pub client: String,
    /// Higher wins; ties break by ascending rule id.
    pub priority: i32,
    pub algo: Algorithm,
    pub window_ms: i64,
    pub limit: i64,
    pub burst: i64,
    /// Ordered dimension names forming the limiter key.
    pub dims: Vec<String>,
    pub quota: QuotaLimits,
    pub enabled: bool,
    pub breaker: BreakerSettings,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("ruleId is required")]
    MissingId,
    #[error("rule {0}: windowMs must be positive")]
    InvalidWindow(String),
    #[error("rule {0}: limit must be positive")]
    InvalidLimit(String),
    #[error("rule {0}: burst must not be negative")]
    InvalidBurst(String),
    #[error("rule {0}: halfOpenProbePercent must be within 0-100")]
    InvalidProbePercent(String),
}

impl Rule {
    /// Validate the invariants every published rule must hold.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.rule_id.trim().is_empty() {
            return Err(RuleError::MissingId);
        }
        if self.window_ms <= 0 {
            return Err(RuleError::InvalidWindow(self.rule_id.clone()));
        }
        if self.enabled && self.limit <= 0 {
            return Err(RuleError::InvalidLimit(self.rule_id.clone()));
        }
        if self.burst < 0 {
            return Err(RuleError::InvalidBurst(self.rule_id.clone()));
        }
        if !(0..=100).contains(&self.breaker.half_open_probe_percent) {
            return Err(RuleError::InvalidProbePercent(self.rule_id.clone()));
        }
        Ok(())
    }

    /// Token/leaky capacity: base rate plus burst headroom.
    pub fn capacity(&self) -> i64 {
        self.limit + self.burst
    }
}

/// Immutable view of the full rule set. A new snapshot is allocated for
/// every change and swapped in whole; readers hold an `Arc` to a consistent
/// generation for the duration of a request.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    rules: HashMap<String, Rule>,
}

impl RuleSnapshot {
    pub fn new(rules: HashMap<String, Rule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.get(rule_id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Clone the backing map to derive the next generation.
    pub fn to_map(&self) -> HashMap<String, Rule> {
        self.rules.clone()
    }
}
