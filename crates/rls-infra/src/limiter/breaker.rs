//! Per-(rule, dim) circuit breaker layered over a limiter.
//!
//! State lives in Redis so every replica agrees on whether a key is open.
//! Closed trips open after `rl_deny_threshold` rate-limit denials inside
//! `rl_deny_window_ms`; open cools down for `min_open_ms`; half-open admits
//! a stable sample of dim keys as probes and closes after
//! `half_open_min_pass` successes or re-opens after `half_open_max_fail`
//! denials.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rls_core::decision::{reason, Decision};
use rls_core::dims::fnv1a_32;
use rls_core::ports::{LimitError, Limiter};
use rls_core::rule::Rule;

use crate::repo::RedisRepo;

const STATE_OPEN: &str = "open";
const STATE_HALF: &str = "half";
const STATE_CLOSED: &str = "closed";

pub struct BreakerLimiter {
    repo: Arc<RedisRepo>,
    inner: Arc<dyn Limiter>,
    algo_name: &'static str,
}

impl BreakerLimiter {
    pub fn new(repo: Arc<RedisRepo>, inner: Arc<dyn Limiter>, algo_name: &'static str) -> Self {
        Self {
            repo,
            inner,
            algo_name,
        }
    }

    async fn load_state(&self, rule_id: &str, dim_key: &str) -> (String, i64) {
        let state = self
            .repo
            .get_string(&self.repo.key_breaker(rule_id, dim_key, "state"))
            .await
            .ok()
            .flatten()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| STATE_CLOSED.to_string());
        let until = self
            .repo
            .get_i64(&self.repo.key_breaker(rule_id, dim_key, "until"))
            .await
            .ok()
            .flatten()
            .unwrap_or(0);
        (state, until)
    }

    async fn set_open(&self, rule: &Rule, dim_key: &str, now_ms: i64) {
        let until = now_ms + rule.breaker.min_open_ms;
        self.write_state(rule, dim_key, STATE_OPEN, Some(until)).await;
        tracing::info!(rule_id = %rule.rule_id, dim_key, until, algo = self.algo_name, "breaker open");
    }

    async fn set_half(&self, rule: &Rule, dim_key: &str) {
        self.write_state(rule, dim_key, STATE_HALF, None).await;
        tracing::info!(rule_id = %rule.rule_id, dim_key, "breaker half-open");
    }

    async fn set_closed(&self, rule: &Rule, dim_key: &str) {
        self.write_state(rule, dim_key, STATE_CLOSED, None).await;
        tracing::info!(rule_id = %rule.rule_id, dim_key, "breaker closed");
    }

    /// Best effort: a lost write only delays a transition, the next call
    /// re-evaluates from the counters.
    async fn write_state(&self, rule: &Rule, dim_key: &str, state: &str, until: Option<i64>) {
        let id = &rule.rule_id;
        if let Err(e) = self
            .repo
            .set_string(&self.repo.key_breaker(id, dim_key, "state"), state)
            .await
        {
            tracing::warn!(rule_id = %id, error = %e, "breaker state write failed");
        }
        if let Some(until) = until {
            if let Err(e) = self
                .repo
                .set_string(&self.repo.key_breaker(id, dim_key, "until"), &until.to_string())
                .await
            {
                tracing::warn!(rule_id = %id, error = %e, "breaker until write failed");
            }
        }
        let half_keys = [
            self.repo.key_breaker(id, dim_key, "half:pass"),
            self.repo.key_breaker(id, dim_key, "half:fail"),
        ];
        if let Err(e) = self.repo.del(&half_keys).await {
            tracing::warn!(rule_id = %id, error = %e, "breaker counter reset failed");
        }
    }

    async fn half_open_probe(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
        now_ms: i64,
    ) -> Result<Decision, LimitError> {
        // Sampling is stable per dim key so one client sees a consistent
        // verdict for the whole probe window; a miss is not a failure.
        if !stable_sample(dim_key, rule.breaker.half_open_probe_percent) {
            return Ok(Decision::deny(reason::PROBE_DROPPED));
        }

        let decision = self.inner.allow(rule, dim_key, now).await?;
        if decision.allowed {
            if rule.breaker.half_open_min_pass > 0 {
                let pass = self
                    .repo
                    .incr(&self.repo.key_breaker(&rule.rule_id, dim_key, "half:pass"))
                    .await
                    .unwrap_or(0);
                if pass >= rule.breaker.half_open_min_pass {
                    self.set_closed(rule, dim_key).await;
                }
            }
            return Ok(decision);
        }

        if rule.breaker.half_open_max_fail > 0 {
            let fail = self
                .repo
                .incr(&self.repo.key_breaker(&rule.rule_id, dim_key, "half:fail"))
                .await
                .unwrap_or(0);
            if fail >= rule.breaker.half_open_max_fail {
                self.set_open(rule, dim_key, now_ms).await;
            }
        }
        Ok(decision)
    }
}

/// Stable FNV-1a sample so the same dim key is consistently selected or
/// excluded during a probe window.
pub(crate) fn stable_sample(dim_key: &str, percent: i64) -> bool {
    if percent <= 0 {
        return false;
    }
    if percent >= 100 {
        return true;
    }
    (fnv1a_32(dim_key) % 100) < percent as u32
}

#[async_trait]
impl Limiter for BreakerLimiter {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        if !rule.breaker.enabled {
            return self.inner.allow(rule, dim_key, now).await;
        }

        let now_ms = now.timestamp_millis();
        let (state, until) = self.load_state(&rule.rule_id, dim_key).await;

        match state.as_str() {
            STATE_OPEN => {
                if until == 0 || now_ms < until {
                    return Ok(Decision::deny(reason::CIRCUIT_OPEN)
                        .with_retry_after_ms((until - now_ms).max(0)));
                }
                // Cooled down: start probing.
                self.set_half(rule, dim_key).await;
                self.half_open_probe(rule, dim_key, now, now_ms).await
            }
            STATE_HALF => self.half_open_probe(rule, dim_key, now, now_ms).await,
            _ => {
                let decision = self.inner.allow(rule, dim_key, now).await?;
                if !decision.allowed
                    && rule.breaker.rl_deny_threshold > 0
                    && rule.breaker.rl_deny_window_ms > 0
                {
                    let deny_key = self.repo.key_breaker(&rule.rule_id, dim_key, "rldeny");
                    let count = self.repo.incr(&deny_key).await.unwrap_or(0);
                    if let Err(e) = self
                        .repo
                        .pexpire(&deny_key, rule.breaker.rl_deny_window_ms)
                        .await
                    {
                        tracing::warn!(rule_id = %rule.rule_id, error = %e, "rldeny expire failed");
                    }
                    if count >= rule.breaker.rl_deny_threshold {
                        self.set_open(rule, dim_key, now_ms).await;
                        return Ok(Decision::deny(reason::CIRCUIT_OPEN_BY_RL_EXCEED)
                            .with_retry_after_ms(rule.breaker.min_open_ms));
                    }
                }
                Ok(decision)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::get_test_repo;
    use rls_core::rule::{Algorithm, BreakerSettings};

    #[test]
    fn test_stable_sample_is_deterministic() {
        for key in ["a", "dim-1", "dim-2", "0123456789abcdef"] {
            let first = stable_sample(key, 37);
            for _ in 0..100 {
                assert_eq!(stable_sample(key, 37), first);
            }
        }
    }

    #[test]
    fn test_sample_bounds() {
        assert!(!stable_sample("anything", 0));
        assert!(stable_sample("anything", 100));
    }

    struct AlwaysDeny;

    #[async_trait]
    impl Limiter for AlwaysDeny {
        async fn allow(
            &self,
            _rule: &Rule,
            _dim_key: &str,
            _now: DateTime<Utc>,
        ) -> Result<Decision, LimitError> {
            Ok(Decision::deny(reason::TOKEN_EMPTY).with_retry_after_ms(100))
        }
    }

    fn tripping_rule() -> Rule {
        Rule {
            rule_id: "brk-test".to_string(),
            algo: Algorithm::TokenBucket,
            window_ms: 1000,
            limit: 1,
            enabled: true,
            breaker: BreakerSettings {
                enabled: true,
                rl_deny_threshold: 3,
                rl_deny_window_ms: 10_000,
                min_open_ms: 60_000,
                half_open_probe_percent: 100,
                half_open_min_pass: 1,
                half_open_max_fail: 1,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_repeated_denials_trip_open() {
        let Some(repo) = get_test_repo("breaker").await else {
            return;
        };
        let repo = Arc::new(repo);
        let breaker = BreakerLimiter::new(repo.clone(), Arc::new(AlwaysDeny), "token_bucket");
        let rule = tripping_rule();
        let now = Utc::now();

        // Two denials accumulate, the third crosses the threshold.
        for _ in 0..2 {
            let d = breaker.allow(&rule, "k1", now).await.unwrap();
            assert_eq!(d.reason, reason::TOKEN_EMPTY);
        }
        let tripped = breaker.allow(&rule, "k1", now).await.unwrap();
        assert_eq!(tripped.reason, reason::CIRCUIT_OPEN_BY_RL_EXCEED);
        assert_eq!(tripped.retry_after_ms, rule.breaker.min_open_ms);

        // While the cooldown runs every call is rejected outright.
        let held = breaker.allow(&rule, "k1", now).await.unwrap();
        assert_eq!(held.reason, reason::CIRCUIT_OPEN);
        assert!(held.retry_after_ms > 0);

        let cleanup = ["state", "until", "rldeny", "half:pass", "half:fail"]
            .map(|f| repo.key_breaker("brk-test", "k1", f));
        repo.del(&cleanup).await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_breaker_is_transparent() {
        let Some(repo) = get_test_repo("breaker-off").await else {
            return;
        };
        let breaker = BreakerLimiter::new(Arc::new(repo), Arc::new(AlwaysDeny), "token_bucket");
        let mut rule = tripping_rule();
        rule.breaker.enabled = false;

        for _ in 0..5 {
            let d = breaker.allow(&rule, "k1", Utc::now()).await.unwrap();
            assert_eq!(d.reason, reason::TOKEN_EMPTY);
        }
    }
}
