//! Quota port - long-horizon hour/day counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::decision::Decision;
use crate::rule::Rule;

/// Check-then-increment against the rule's hour/day quota buckets.
/// Implementations convert backend failures into deny decisions behind
/// their own protection, so this never errors.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check_and_incr(&self, rule: &Rule, dim_key: &str, now: DateTime<Utc>) -> Decision;
}
