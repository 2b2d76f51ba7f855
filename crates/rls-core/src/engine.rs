//! Decision engine - composes matcher, IP gate, quota gate, and limiters
//! under the process-wide fail policy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::{reason, Decision};
use crate::dims;
use crate::ports::{IpListGate, LimitError, Limiter, QuotaGate};
use crate::router::{Matcher, RequestCtx};
use crate::rule::Rule;

/// What to do when downstream infrastructure fails mid-decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailPolicy {
    FailOpen,
    #[default]
    FailClosed,
}

pub struct Engine {
    matcher: Arc<Matcher>,
    limiter: Arc<dyn Limiter>,
    ip_gate: Option<Arc<dyn IpListGate>>,
    quota: Option<Arc<dyn QuotaGate>>,
    fail_policy: FailPolicy,
}

impl Engine {
    pub fn new(
        matcher: Arc<Matcher>,
        limiter: Arc<dyn Limiter>,
        ip_gate: Option<Arc<dyn IpListGate>>,
        quota: Option<Arc<dyn QuotaGate>>,
        fail_policy: FailPolicy,
    ) -> Self {
        Self {
            matcher,
            limiter,
            ip_gate,
            quota,
            fail_policy,
        }
    }

    /// Match rules for the request context and evaluate them in order.
    pub async fn allow_request(
        &self,
        ctx: &RequestCtx,
        dims: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Decision {
        let rules = self.matcher.match_rules(ctx);
        self.allow_rules(&rules, dims, now).await
    }

    /// Evaluate rules in priority order, returning the first denial or a
    /// composed allow carrying the minimum remaining budget.
    pub async fn allow_rules(
        &self,
        rules: &[Rule],
        dims: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Decision {
        if rules.is_empty() {
            return Decision::allow(reason::NO_RULES);
        }

        let mut any_error = false;

        match self.check_ip_lists(dims).await {
            Ok(Some(decision)) => return decision,
            Ok(None) => {}
            Err(err) => {
                any_error = true;
                if self.fail_policy == FailPolicy::FailClosed {
                    tracing::warn!(error = %err, "fail-closed on ip list error");
                    return Decision::deny(reason::FAIL_CLOSED);
                }
                tracing::warn!(error = %err, "fail-open on ip list error");
            }
        }

        let mut any_rule = false;
        let mut min_remaining: Option<i64> = None;

        for rule in rules {
            if !rule.enabled {
                continue;
            }
            any_rule = true;

            let decision = match self.allow_rule(rule, dims, now).await {
                Ok(decision) => decision,
                Err(err) => {
                    any_error = true;
                    if self.fail_policy == FailPolicy::FailOpen {
                        tracing::warn!(
                            rule_id = %rule.rule_id,
                            algo = rule.algo.as_str(),
                            error = %err,
                            "fail-open on limiter error"
                        );
                        continue;
                    }
                    tracing::warn!(
                        rule_id = %rule.rule_id,
                        algo = rule.algo.as_str(),
                        error = %err,
                        "fail-closed on limiter error"
                    );
                    return Decision::deny(reason::FAIL_CLOSED);
                }
            };

            if !decision.allowed {
                return decision;
            }
            if decision.remaining >= 0 {
                min_remaining = Some(match min_remaining {
                    Some(current) => current.min(decision.remaining),
                    None => decision.remaining,
                });
            }
        }

        if !any_rule {
            return Decision::allow(reason::NO_ENABLED_RULES);
        }

        let mut out = if any_error && self.fail_policy == FailPolicy::FailOpen {
            Decision::allow(reason::FAIL_OPEN)
        } else {
            Decision::allow(reason::ALLOWED)
        };
        if let Some(remaining) = min_remaining {
            out.remaining = remaining;
        }
        out
    }

    async fn allow_rule(
        &self,
        rule: &Rule,
        dims_in: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        let dim_key = dims::hash_dims(&rule.dims, dims_in)
            .map_err(|e| LimitError::MissingDimension(e.to_string()))?;

        if rule.quota.enforced() {
            if let Some(quota) = &self.quota {
                let decision = quota.check_and_incr(rule, &dim_key, now).await;
                if !decision.allowed {
                    return Ok(decision);
                }
            }
        }

        let decision = self.limiter.allow(rule, &dim_key, now).await?;
        if !decision.allowed {
            // Only limiter denials feed the hot-IP counter; quota and IP
            // list verdicts do not compound.
            self.record_deny(dims_in).await;
        }
        Ok(decision)
    }

    async fn check_ip_lists(
        &self,
        dims: &HashMap<String, String>,
    ) -> Result<Option<Decision>, crate::ports::IpListError> {
        let Some(gate) = &self.ip_gate else {
            return Ok(None);
        };
        let ip = dims.get("ip").map(|s| s.trim()).unwrap_or("");
        if ip.is_empty() {
            return Ok(None);
        }
        gate.check_ip(ip).await
    }

    async fn record_deny(&self, dims: &HashMap<String, String>) {
        if let Some(gate) = &self.ip_gate {
            if let Some(ip) = dims.get("ip").map(|s| s.trim()).filter(|s| !s.is_empty()) {
                gate.record_deny(ip).await;
            }
        }
    }
}
