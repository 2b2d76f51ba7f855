//! L1 in-process TTL entries over the Redis source of truth, with hot-IP
//! auto-blacklisting and a pub/sub invalidation bus.
//!
//! Safety first: a Redis error on any list check denies the request rather
//! than letting a possibly-blacklisted caller through.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;

use rls_core::decision::{reason, Decision};
use rls_core::ports::{IpListError, IpListGate};

use crate::repo::RedisRepo;

#[derive(Debug, Clone)]
pub struct IpListConfig {
    /// L1 TTL for blacklist/whitelist verdicts.
    pub default_ttl: Duration,
    /// L1 and L2 TTL for temporary blacklist entries.
    pub temp_blacklist_ttl: Duration,
    pub hot_enabled: bool,
    /// Denials within `hot_window` before an IP is auto-banned.
    pub hot_threshold: i64,
    pub hot_window: Duration,
}

impl Default for IpListConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            temp_blacklist_ttl: Duration::from_secs(600),
            hot_enabled: true,
            hot_threshold: 10,
            hot_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct L1Entry {
    value: bool,
    expires_at: Instant,
}

pub struct IpListCache {
    repo: Arc<RedisRepo>,
    cfg: IpListConfig,
    l1: DashMap<String, L1Entry>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl IpListCache {
    pub fn new(repo: Arc<RedisRepo>, cfg: IpListConfig) -> Arc<Self> {
        Arc::new(Self {
            repo,
            cfg,
            l1: DashMap::new(),
            watcher: Mutex::new(None),
        })
    }

    /// Subscribe to the invalidation channel; any message clears L1. While
    /// disconnected the cache keeps serving from source-of-truth queries.
    pub fn spawn_invalidation_watcher(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let channel = cache.repo.iplist_channel();
            loop {
                let mut pubsub = match cache.repo.subscribe(&channel).await {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "iplist invalidation subscribe failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                tracing::debug!(channel = %channel, "iplist invalidation watcher subscribed");
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    tracing::debug!(channel = msg.get_channel_name(), "iplist cache invalidated");
                    cache.clear();
                }
                tracing::warn!("iplist invalidation stream closed, resubscribing");
            }
        });
        *self.watcher.lock().unwrap() = Some(handle);
    }

    /// Stop the invalidation watcher.
    pub fn close(&self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn clear(&self) {
        self.l1.clear();
    }

    fn l1_get(&self, key: &str) -> Option<bool> {
        if let Some(entry) = self.l1.get(key) {
            if Instant::now() <= entry.expires_at {
                return Some(entry.value);
            }
            drop(entry);
            self.l1.remove(key);
        }
        None
    }

    fn l1_set(&self, key: String, value: bool, ttl: Duration) {
        self.l1.insert(
            key,
            L1Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl IpListGate for IpListCache {
    async fn check_ip(&self, ip: &str) -> Result<Option<Decision>, IpListError> {
        if ip.is_empty() {
            return Ok(None);
        }

        let temp_key = format!("{}:black_tmp", ip);
        if self.l1_get(&temp_key) == Some(true) {
            return Ok(Some(Decision::deny(reason::IP_TEMP_BLACKLIST_L1)));
        }
        match self.repo.exists(&self.repo.key_temp_blacklist(ip)).await {
            Ok(true) => {
                self.l1_set(temp_key, true, self.cfg.temp_blacklist_ttl);
                return Ok(Some(Decision::deny(reason::IP_TEMP_BLACKLIST_L2)));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(ip, error = %e, "temp blacklist check failed");
                return Ok(Some(Decision::deny(reason::TEMP_BLACKLIST_CHECK_FAILED)));
            }
        }

        let black_key = format!("{}:black", ip);
        if self.l1_get(&black_key) == Some(true) {
            return Ok(Some(Decision::deny(reason::IP_BLACKLIST_L1)));
        }
        match self.repo.sismember(&self.repo.key_blacklist(), ip).await {
            Ok(true) => {
                self.l1_set(black_key, true, self.cfg.default_ttl);
                return Ok(Some(Decision::deny(reason::IP_BLACKLIST_L2)));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(ip, error = %e, "blacklist check failed");
                return Ok(Some(Decision::deny(reason::BLACKLIST_CHECK_FAILED)));
            }
        }

        let white_key = format!("{}:white", ip);
        match self.l1_get(&white_key) {
            Some(true) => return Ok(Some(Decision::allow(reason::IP_WHITELIST_L1))),
            Some(false) => {}
            None => match self.repo.sismember(&self.repo.key_whitelist(), ip).await {
                Ok(in_white) => {
                    self.l1_set(white_key, in_white, self.cfg.default_ttl);
                    if in_white {
                        return Ok(Some(Decision::allow(reason::IP_WHITELIST_L2)));
                    }
                }
                Err(e) => {
                    tracing::error!(ip, error = %e, "whitelist check failed");
                    return Ok(Some(Decision::deny(reason::WHITELIST_CHECK_FAILED)));
                }
            },
        }

        Ok(None)
    }

    async fn record_deny(&self, ip: &str) {
        if !self.cfg.hot_enabled || ip.is_empty() {
            return;
        }
        if self.cfg.hot_threshold <= 0 {
            return;
        }

        let temp_key = format!("{}:black_tmp", ip);
        if self.l1_get(&temp_key) == Some(true) {
            return;
        }

        let count = match self
            .repo
            .incr_and_expire(&self.repo.key_hot_ip(ip), self.cfg.hot_window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(ip, error = %e, "hot ip counter failed");
                return;
            }
        };
        if count < self.cfg.hot_threshold {
            return;
        }

        if let Err(e) = self
            .repo
            .set_ex(&self.repo.key_temp_blacklist(ip), "1", self.cfg.temp_blacklist_ttl)
            .await
        {
            tracing::error!(ip, error = %e, "set temp blacklist failed");
            return;
        }
        self.l1_set(temp_key, true, self.cfg.temp_blacklist_ttl);
        tracing::warn!(ip, count, "hot ip auto-blacklisted");

        if let Err(e) = self
            .repo
            .publish(&self.repo.iplist_channel(), "iplist_update")
            .await
        {
            tracing::warn!(error = %e, "iplist invalidation publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::get_test_repo;

    #[tokio::test]
    async fn test_blacklist_l2_then_l1() {
        let Some(repo) = get_test_repo("iplist").await else {
            return;
        };
        let repo = Arc::new(repo);
        let cache = IpListCache::new(repo.clone(), IpListConfig::default());

        // Seed the source of truth directly.
        let black = repo.key_blacklist();
        redis_sadd(&black, "2.2.2.2").await;

        let first = cache.check_ip("2.2.2.2").await.unwrap().unwrap();
        assert!(!first.allowed);
        assert_eq!(first.reason, reason::IP_BLACKLIST_L2);

        let second = cache.check_ip("2.2.2.2").await.unwrap().unwrap();
        assert_eq!(second.reason, reason::IP_BLACKLIST_L1);

        repo.del(&[black]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_ip_is_not_handled() {
        let Some(repo) = get_test_repo("iplist-miss").await else {
            return;
        };
        let cache = IpListCache::new(Arc::new(repo), IpListConfig::default());
        assert!(cache.check_ip("4.4.4.4").await.unwrap().is_none());
        // The negative whitelist verdict is cached; a second pass still
        // falls through.
        assert!(cache.check_ip("4.4.4.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hot_ip_auto_ban() {
        let Some(repo) = get_test_repo("hotip").await else {
            return;
        };
        let repo = Arc::new(repo);
        let cache = IpListCache::new(
            repo.clone(),
            IpListConfig {
                hot_threshold: 3,
                ..Default::default()
            },
        );

        for _ in 0..3 {
            cache.record_deny("3.3.3.3").await;
        }

        let verdict = cache.check_ip("3.3.3.3").await.unwrap().unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.starts_with("ip_in_temp_blacklist"));

        repo.del(&[
            repo.key_hot_ip("3.3.3.3"),
            repo.key_temp_blacklist("3.3.3.3"),
        ])
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_whitelist_allows() {
        let Some(repo) = get_test_repo("whitelist").await else {
            return;
        };
        let repo = Arc::new(repo);
        let cache = IpListCache::new(repo.clone(), IpListConfig::default());

        let white = repo.key_whitelist();
        redis_sadd(&white, "5.5.5.5").await;

        let first = cache.check_ip("5.5.5.5").await.unwrap().unwrap();
        assert!(first.allowed);
        assert_eq!(first.reason, reason::IP_WHITELIST_L2);

        let second = cache.check_ip("5.5.5.5").await.unwrap().unwrap();
        assert_eq!(second.reason, reason::IP_WHITELIST_L1);

        repo.del(&[white]).await.unwrap();
    }

    // Tests reach around the repo for set seeding only; the service itself
    // never writes the black/white lists.
    async fn redis_sadd(key: &str, member: &str) {
        let client = redis::Client::open(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        )
        .unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = redis::AsyncCommands::sadd(&mut conn, key, member).await.unwrap();
    }
}
