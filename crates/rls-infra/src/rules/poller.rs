//! Rule source poller - periodic pull from an external config source.
//!
//! Unchanged versions are skipped. A failed fetch under fail-closed clears
//! the snapshot so everything denies; under fail-open the last good rule
//! set keeps serving.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use rls_core::engine::FailPolicy;
use rls_core::ports::{RuleSource, SourceError};
use rls_core::rule::Rule;

use super::store::RuleStore;

pub struct Poller {
    source: Arc<dyn RuleSource>,
    store: Arc<RuleStore>,
    interval: Duration,
    fail_policy: FailPolicy,
    last_version: tokio::sync::Mutex<String>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn RuleSource>,
        store: Arc<RuleStore>,
        interval: Duration,
        fail_policy: FailPolicy,
    ) -> Arc<Self> {
        let interval = if interval.is_zero() {
            Duration::from_secs(5)
        } else {
            interval
        };
        Arc::new(Self {
            source,
            store,
            interval,
            fail_policy,
            last_version: tokio::sync::Mutex::new(String::new()),
        })
    }

    /// One pull; true when a new rule set was applied.
    pub async fn sync_once(&self) -> Result<bool, SourceError> {
        let payload = match self.source.fetch().await {
            Ok(payload) => payload,
            Err(e) => {
                if self.fail_policy == FailPolicy::FailClosed {
                    tracing::warn!(error = %e, "rule fetch failed, clearing rules (fail-closed)");
                    self.store.replace_all(HashMap::new());
                } else {
                    tracing::warn!(error = %e, "rule fetch failed, keeping last-good rules");
                }
                return Err(e);
            }
        };

        let mut last_version = self.last_version.lock().await;
        if !payload.version.is_empty() && payload.version == *last_version {
            return Ok(false);
        }

        let rules = build_rule_map(payload.rules);
        if rules.is_empty() {
            tracing::warn!("rule source payload contains no valid rules");
        }
        self.store.replace_all(rules);
        *last_version = payload.version;
        Ok(true)
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = poller.sync_once().await {
                    tracing::warn!(error = %e, "rule source pull failed");
                }
            }
        })
    }
}

fn build_rule_map(rules: Vec<Rule>) -> HashMap<String, Rule> {
    let mut map = HashMap::with_capacity(rules.len());
    for rule in rules {
        if let Err(e) = rule.validate() {
            tracing::warn!(error = %e, "rule from source rejected");
            continue;
        }
        map.insert(rule.rule_id.clone(), rule);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rls_core::ports::RulesPayload;
    use rls_core::rule::Algorithm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        responses: Mutex<Vec<Result<RulesPayload, ()>>>,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(responses: Vec<Result<RulesPayload, ()>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RuleSource for FakeSource {
        async fn fetch(&self) -> Result<RulesPayload, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            match responses.remove(0) {
                Ok(payload) => Ok(payload),
                Err(()) => Err(SourceError::Http("connection refused".to_string())),
            }
        }
    }

    fn payload(version: &str, ids: &[&str]) -> RulesPayload {
        RulesPayload {
            rules: ids
                .iter()
                .map(|id| Rule {
                    rule_id: id.to_string(),
                    algo: Algorithm::TokenBucket,
                    window_ms: 1000,
                    limit: 5,
                    enabled: true,
                    ..Default::default()
                })
                .collect(),
            version: version.to_string(),
        }
    }

    async fn store() -> Option<Arc<RuleStore>> {
        crate::repo::test_support::get_test_repo("poller")
            .await
            .map(|repo| RuleStore::new(Arc::new(repo)))
    }

    #[tokio::test]
    async fn test_apply_then_skip_same_version() {
        let Some(store) = store().await else { return };
        let source = FakeSource::new(vec![
            Ok(payload("v1", &["a"])),
            Ok(payload("v1", &["a", "b"])),
            Ok(payload("v2", &["a", "b"])),
        ]);
        let poller = Poller::new(
            source,
            store.clone(),
            Duration::from_secs(5),
            FailPolicy::FailOpen,
        );

        assert!(poller.sync_once().await.unwrap());
        assert_eq!(store.snapshot().len(), 1);

        // Same version: payload ignored even though it differs.
        assert!(!poller.sync_once().await.unwrap());
        assert_eq!(store.snapshot().len(), 1);

        assert!(poller.sync_once().await.unwrap());
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_closed_clears_rules() {
        let Some(store) = store().await else { return };
        let source = FakeSource::new(vec![Ok(payload("v1", &["a"])), Err(())]);
        let poller = Poller::new(
            source,
            store.clone(),
            Duration::from_secs(5),
            FailPolicy::FailClosed,
        );

        poller.sync_once().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);

        assert!(poller.sync_once().await.is_err());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_fail_open_keeps_last_good() {
        let Some(store) = store().await else { return };
        let source = FakeSource::new(vec![Ok(payload("v1", &["a"])), Err(())]);
        let poller = Poller::new(
            source,
            store.clone(),
            Duration::from_secs(5),
            FailPolicy::FailOpen,
        );

        poller.sync_once().await.unwrap();
        assert!(poller.sync_once().await.is_err());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rules_are_dropped() {
        let Some(store) = store().await else { return };
        let mut bad = payload("v1", &["good"]);
        bad.rules.push(Rule {
            rule_id: "bad".to_string(),
            window_ms: 0,
            ..Default::default()
        });
        let poller = Poller::new(
            FakeSource::new(vec![Ok(bad)]),
            store.clone(),
            Duration::from_secs(5),
            FailPolicy::FailOpen,
        );

        poller.sync_once().await.unwrap();
        assert!(store.get("good").is_some());
        assert!(store.get("bad").is_none());
    }
}
