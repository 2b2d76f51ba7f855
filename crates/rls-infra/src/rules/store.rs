//! Rule store - Redis-persisted rules served through a lock-free snapshot.
//!
//! Every mutation allocates a complete snapshot generation and swaps it in
//! whole, then rebuilds the route index. A watcher task reloads on pub/sub
//! notifications with a 60 s interval as a safety net against lost
//! messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;

use rls_core::router::{Matcher, RouteSnapshot};
use rls_core::rule::{Rule, RuleError, RuleSnapshot};
use rls_core::snapshot::SnapshotCell;

use crate::repo::{RedisRepo, RepoError};

const SAFETY_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] RuleError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("rule encode failed: {0}")]
    Encode(String),
}

pub struct RuleStore {
    repo: Arc<RedisRepo>,
    snapshot: SnapshotCell<RuleSnapshot>,
    matcher: Arc<Matcher>,
}

impl RuleStore {
    pub fn new(repo: Arc<RedisRepo>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            snapshot: SnapshotCell::default(),
            matcher: Arc::new(Matcher::default()),
        })
    }

    /// Route matcher kept in lockstep with the rule snapshot.
    pub fn matcher(&self) -> Arc<Matcher> {
        Arc::clone(&self.matcher)
    }

    /// Non-blocking read from the current snapshot.
    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        self.snapshot.load().get(rule_id).cloned()
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.load()
    }

    /// Write initial rules only where no rule exists yet, then load all.
    pub async fn bootstrap(&self, initial: &[Rule]) -> Result<(), StoreError> {
        for rule in initial {
            rule.validate()?;
            let payload =
                serde_json::to_string(rule).map_err(|e| StoreError::Encode(e.to_string()))?;
            let written = self
                .repo
                .set_string_nx(&self.repo.key_rule(&rule.rule_id), &payload)
                .await?;
            if written {
                tracing::info!(rule_id = %rule.rule_id, "bootstrap rule written");
            }
        }
        self.reload_all().await
    }

    /// Full reload via cursored scan. A failed reload keeps the last good
    /// snapshot.
    pub async fn reload_all(&self) -> Result<(), StoreError> {
        let keys = self.repo.scan_keys(&self.repo.rule_key_pattern()).await?;

        let mut rules = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.repo.get_string(&key).await.unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "rule fetch failed");
                None
            }) else {
                continue;
            };
            match serde_json::from_str::<Rule>(&raw) {
                Ok(rule) if !rule.rule_id.is_empty() => {
                    rules.insert(rule.rule_id.clone(), rule);
                }
                Ok(_) => tracing::warn!(key = %key, "rule missing id, skipped"),
                Err(e) => tracing::warn!(key = %key, error = %e, "rule decode failed, skipped"),
            }
        }

        let count = rules.len();
        self.install(rules);
        tracing::info!(count, "rules reloaded");
        Ok(())
    }

    /// Persist one rule, publish it locally, then notify other replicas.
    /// A failed Redis write leaves the local snapshot untouched.
    pub async fn upsert(&self, rule: Rule) -> Result<(), StoreError> {
        rule.validate()?;
        let payload = serde_json::to_string(&rule).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.repo
            .set_string(&self.repo.key_rule(&rule.rule_id), &payload)
            .await?;

        let rule_id = rule.rule_id.clone();
        let mut rules = self.snapshot.load().to_map();
        rules.insert(rule_id.clone(), rule);
        self.install(rules);

        self.repo
            .publish(self.repo.updates_channel(), &rule_id)
            .await?;
        Ok(())
    }

    /// Unconditionally replace the whole rule set (poller path).
    pub fn replace_all(&self, rules: HashMap<String, Rule>) {
        self.install(rules);
    }

    fn install(&self, rules: HashMap<String, Rule>) {
        let snapshot = RuleSnapshot::new(rules);
        self.matcher.replace(RouteSnapshot::build(snapshot.rules()));
        self.snapshot.replace(snapshot);
    }

    /// Reload on update notifications, and every 60 s regardless.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let channel = store.repo.updates_channel().to_string();
            let mut ticker = tokio::time::interval(SAFETY_RELOAD_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick completes immediately

            loop {
                let mut pubsub = match store.repo.subscribe(&channel).await {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "rule watcher subscribe failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                tracing::debug!(channel = %channel, "rule watcher subscribed");
                let mut stream = pubsub.on_message();

                loop {
                    tokio::select! {
                        msg = stream.next() => match msg {
                            Some(msg) => {
                                let rule_id = msg.get_payload::<String>().unwrap_or_default();
                                tracing::debug!(rule_id = %rule_id, "rule update notification");
                                if let Err(e) = store.reload_all().await {
                                    tracing::warn!(error = %e, "rule reload failed");
                                }
                            }
                            None => {
                                tracing::warn!("rule update stream closed, resubscribing");
                                break;
                            }
                        },
                        _ = ticker.tick() => {
                            if let Err(e) = store.reload_all().await {
                                tracing::warn!(error = %e, "periodic rule reload failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
