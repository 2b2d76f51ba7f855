//! Sliding window limiter - a sorted set of request timestamps per key.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rls_core::decision::{reason, Decision};
use rls_core::ports::{LimitError, Limiter};
use rls_core::rule::Rule;

use crate::repo::{script_pair, RedisRepo};

pub struct SlidingWindow {
    repo: Arc<RedisRepo>,
}

impl SlidingWindow {
    pub fn new(repo: Arc<RedisRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Limiter for SlidingWindow {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        let key = self.repo.key_sliding(&rule.rule_id, dim_key);

        let value = self
            .repo
            .run_sliding(&key, now.timestamp_millis(), rule.window_ms, rule.limit)
            .await
            .map_err(|e| LimitError::Backend(e.to_string()))?;
        let (allowed, count) = script_pair(&value)
            .ok_or_else(|| LimitError::InvalidScriptResponse(format!("{:?}", value)))?;

        if allowed != 1 {
            return Ok(Decision::deny(reason::SLIDING_EXCEEDED)
                .with_retry_after_ms(rule.window_ms));
        }
        Ok(Decision::allow(reason::SLIDING_ALLOWED).with_remaining(rule.limit - count))
    }
}
