//! Hour/day quota controller over the atomic check-then-increment script.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, Local, LocalResult, TimeZone, Utc};

use rls_core::decision::{reason, Decision};
use rls_core::ports::QuotaGate;
use rls_core::rule::Rule;

use crate::repo::{script_triple, RedisRepo};

use super::breaker::{Gate, QuotaBreaker};

/// Bucket TTLs carry a grace period past their natural span.
const HOUR_TTL_S: i64 = 3_600 + 600;
const DAY_TTL_S: i64 = 86_400 + 3_600;
/// Remaining reported when a scope has no limit configured.
const DEFAULT_REMAINING: i64 = 999_999;

pub struct QuotaController {
    repo: Arc<RedisRepo>,
    breaker: QuotaBreaker,
}

impl QuotaController {
    pub fn new(repo: Arc<RedisRepo>) -> Self {
        Self {
            repo,
            breaker: QuotaBreaker::new(),
        }
    }
}

#[async_trait]
impl QuotaGate for QuotaController {
    async fn check_and_incr(&self, rule: &Rule, dim_key: &str, now: DateTime<Utc>) -> Decision {
        let now_ms = now.timestamp_millis();
        match self.breaker.admit(now_ms) {
            Gate::Open => return Decision::deny(reason::QUOTA_BREAKER_OPEN),
            Gate::Throttled => return Decision::deny(reason::WARMUP_THROTTLED),
            Gate::Pass => {}
        }

        let local = now.with_timezone(&Local);
        let hour_key = self.repo.key_quota_hour(
            &rule.rule_id,
            dim_key,
            &local.format("%Y%m%d%H").to_string(),
        );
        let day_key =
            self.repo
                .key_quota_day(&rule.rule_id, dim_key, &local.format("%Y%m%d").to_string());

        let result = self
            .repo
            .run_quota(
                &hour_key,
                &day_key,
                rule.quota.per_hour,
                rule.quota.per_day,
                HOUR_TTL_S,
                DAY_TTL_S,
                DEFAULT_REMAINING,
            )
            .await;

        match result {
            Err(e) => {
                self.breaker.record(false, now_ms);
                tracing::error!(rule_id = %rule.rule_id, error = %e, "quota script failed");
                Decision::deny(reason::QUOTA_INCR_FAILED)
            }
            Ok(raw) => {
                self.breaker.record(true, now_ms);
                let Some((code, scope, value)) = script_triple(&raw) else {
                    tracing::error!(rule_id = %rule.rule_id, response = ?raw, "quota script response malformed");
                    return Decision::deny(reason::INVALID_SCRIPT_RESPONSE);
                };
                if code == 0 {
                    let denied = format!("{}{}", reason::QUOTA_EXCEEDED_PREFIX, scope);
                    Decision::deny(&denied).with_retry_after_ms(retry_after_ms(&scope, now))
                } else {
                    Decision::allow(reason::QUOTA_OK).with_remaining(value)
                }
            }
        }
    }
}

/// Time until the denied scope rolls over: the next hour boundary, or the
/// next local midnight.
fn retry_after_ms(scope: &str, now: DateTime<Utc>) -> i64 {
    match scope {
        "hour" => {
            let now_ms = now.timestamp_millis();
            (now_ms / 3_600_000 + 1) * 3_600_000 - now_ms
        }
        "day" => ms_until_next_local_midnight(now),
        _ => 1_000,
    }
}

fn ms_until_next_local_midnight(now: DateTime<Utc>) -> i64 {
    let local = now.with_timezone(&Local);
    let next = (local.date_naive() + Days::new(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    match Local.from_local_datetime(&next) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
            dt.timestamp_millis() - now.timestamp_millis()
        }
        // A DST gap swallowing midnight: fall back to a whole day.
        LocalResult::None => 86_400_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::get_test_repo;
    use rls_core::rule::QuotaLimits;

    fn quota_rule(per_hour: i64, per_day: i64) -> Rule {
        Rule {
            rule_id: "q-test".to_string(),
            window_ms: 1000,
            limit: 100,
            quota: QuotaLimits {
                per_minute: 0,
                per_hour,
                per_day,
            },
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_hour_retry_lands_on_boundary() {
        let now = Utc::now();
        let retry = retry_after_ms("hour", now);
        assert!(retry > 0 && retry <= 3_600_000);
        assert_eq!((now.timestamp_millis() + retry) % 3_600_000, 0);
    }

    #[test]
    fn test_day_retry_is_bounded() {
        let retry = retry_after_ms("day", Utc::now());
        assert!(retry > 0 && retry <= 86_400_000 + 3_600_000);
    }

    #[tokio::test]
    async fn test_hour_quota_denies_at_limit() {
        let Some(repo) = get_test_repo("quota").await else {
            return;
        };
        let repo = Arc::new(repo);
        let controller = QuotaController::new(repo.clone());
        let rule = quota_rule(2, 0);
        let now = Utc::now();

        let d1 = controller.check_and_incr(&rule, "k1", now).await;
        assert!(d1.allowed, "first call under quota: {:?}", d1);
        assert_eq!(d1.remaining, 1);

        let d2 = controller.check_and_incr(&rule, "k1", now).await;
        assert!(d2.allowed);
        assert_eq!(d2.remaining, 0);

        let d3 = controller.check_and_incr(&rule, "k1", now).await;
        assert!(!d3.allowed);
        assert_eq!(d3.reason, "quota_exceeded:hour");
        assert!(d3.retry_after_ms > 0);

        let local = now.with_timezone(&Local);
        repo.del(&[
            repo.key_quota_hour("q-test", "k1", &local.format("%Y%m%d%H").to_string()),
            repo.key_quota_day("q-test", "k1", &local.format("%Y%m%d").to_string()),
        ])
        .await
        .unwrap();
    }
}
