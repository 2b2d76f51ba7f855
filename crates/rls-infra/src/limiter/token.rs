//! Token bucket limiter - a hash of {tokens, last_ts} refilled by elapsed
//! time at `limit / window_ms` tokens per millisecond.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rls_core::decision::{reason, Decision};
use rls_core::ports::{LimitError, Limiter};
use rls_core::rule::Rule;

use crate::repo::{script_pair, RedisRepo};

/// Suggested backoff when the bucket is empty.
const RETRY_AFTER_MS: i64 = 100;

pub struct TokenBucket {
    repo: Arc<RedisRepo>,
}

impl TokenBucket {
    pub fn new(repo: Arc<RedisRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        let key = self.repo.key_token(&rule.rule_id, dim_key);
        let capacity = rule.capacity();
        let refill_per_ms = rule.limit as f64 / rule.window_ms as f64;
        let ttl_ms = (rule.window_ms * 2).max(rule.window_ms);

        let value = self
            .repo
            .run_token(&key, capacity, refill_per_ms, now.timestamp_millis(), ttl_ms)
            .await
            .map_err(|e| LimitError::Backend(e.to_string()))?;
        let (allowed, tokens) = script_pair(&value)
            .ok_or_else(|| LimitError::InvalidScriptResponse(format!("{:?}", value)))?;

        if allowed != 1 {
            return Ok(Decision::deny(reason::TOKEN_EMPTY)
                .with_remaining(tokens)
                .with_retry_after_ms(RETRY_AFTER_MS));
        }
        Ok(Decision::allow(reason::TOKEN_ALLOWED).with_remaining(tokens))
    }
}
