//! Leaky bucket limiter - a hash of {level, last_ts} drained by elapsed
//! time at `limit / window_ms` per millisecond.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rls_core::decision::{reason, Decision};
use rls_core::ports::{LimitError, Limiter};
use rls_core::rule::Rule;

use crate::repo::{script_pair, RedisRepo};

const RETRY_AFTER_MS: i64 = 100;

pub struct LeakyBucket {
    repo: Arc<RedisRepo>,
}

impl LeakyBucket {
    pub fn new(repo: Arc<RedisRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Limiter for LeakyBucket {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        let key = self.repo.key_leaky(&rule.rule_id, dim_key);
        let max_queue = rule.capacity();
        let rate_per_ms = rule.limit as f64 / rule.window_ms as f64;

        // Keep the key alive long enough for a full bucket to drain, plus
        // a one second grace.
        let mut ttl_ms = if rate_per_ms > 0.0 {
            (max_queue as f64 / rate_per_ms) as i64
        } else {
            0
        };
        if ttl_ms < 1000 {
            ttl_ms = 1000;
        }
        ttl_ms += 1000;

        let value = self
            .repo
            .run_leaky(&key, rate_per_ms, now.timestamp_millis(), max_queue, ttl_ms)
            .await
            .map_err(|e| LimitError::Backend(e.to_string()))?;
        let (allowed, level) = script_pair(&value)
            .ok_or_else(|| LimitError::InvalidScriptResponse(format!("{:?}", value)))?;

        let remaining = max_queue - level;
        if allowed != 1 {
            return Ok(Decision::deny(reason::LEAKY_FULL)
                .with_remaining(remaining)
                .with_retry_after_ms(RETRY_AFTER_MS));
        }
        Ok(Decision::allow(reason::LEAKY_ALLOWED).with_remaining(remaining))
    }
}
