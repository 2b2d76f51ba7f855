//! Shared-state repository over Redis.
//!
//! Owns the key namespace and bounds every command with a deadline:
//! 100 ms for plain commands, 200 ms for script eval, 2 s for connection
//! establishment. A timed-out or failed command surfaces as a `RepoError`
//! that flows through the caller's fail policy.

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use thiserror::Error;

use super::scripts::Scripts;

/// Connection and namespace configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL, e.g. `redis://localhost:6379`.
    pub url: String,
    /// Key namespace prefix.
    pub prefix: String,
    /// Pub/Sub channel for rule update notifications.
    pub updates_channel: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub script_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "pixiu:rls".to_string(),
            updates_channel: "pixiu_rls_updates".to_string(),
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_millis(100),
            script_timeout: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("redis connect failed: {0}")]
    Connection(String),
    #[error("redis {op} timed out")]
    Timeout { op: &'static str },
    #[error("redis {op} failed: {err}")]
    Command { op: &'static str, err: String },
}

/// Redis repository shared by every gate and limiter.
pub struct RedisRepo {
    client: Client,
    conn: ConnectionManager,
    cfg: RedisConfig,
    scripts: Scripts,
}

impl RedisRepo {
    pub async fn new(cfg: RedisConfig) -> Result<Self, RepoError> {
        let client =
            Client::open(cfg.url.as_str()).map_err(|e| RepoError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(cfg.connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| RepoError::Connection("connection timed out".to_string()))?
            .map_err(|e| RepoError::Connection(e.to_string()))?;

        let repo = Self {
            client,
            conn,
            cfg,
            scripts: Scripts::new(),
        };
        repo.ping().await?;

        tracing::info!(url = %repo.cfg.url, prefix = %repo.cfg.prefix, "Connected to Redis");
        Ok(repo)
    }

    pub fn prefix(&self) -> &str {
        &self.cfg.prefix
    }

    pub fn updates_channel(&self) -> &str {
        &self.cfg.updates_channel
    }

    /// Channel carrying IP list L1 invalidation messages.
    pub fn iplist_channel(&self) -> String {
        format!("{}:iplist_updates", self.cfg.prefix)
    }

    // ---- key namespace ----

    pub fn key_rule(&self, rule_id: &str) -> String {
        format!("{}:rule:{{{}}}", self.cfg.prefix, rule_id)
    }

    /// SCAN pattern covering every persisted rule.
    pub fn rule_key_pattern(&self) -> String {
        self.key_rule("*")
    }

    pub fn key_sliding(&self, rule_id: &str, dim_key: &str) -> String {
        format!("{}:sw:{{{}}}:{}", self.cfg.prefix, rule_id, dim_key)
    }

    pub fn key_token(&self, rule_id: &str, dim_key: &str) -> String {
        format!("{}:tb:{{{}}}:{}", self.cfg.prefix, rule_id, dim_key)
    }

    pub fn key_leaky(&self, rule_id: &str, dim_key: &str) -> String {
        format!("{}:lb:{{{}}}:{}", self.cfg.prefix, rule_id, dim_key)
    }

    pub fn key_quota_hour(&self, rule_id: &str, dim_key: &str, ts: &str) -> String {
        format!("{{{}:q:{}:{}}}:h:{}", self.cfg.prefix, rule_id, dim_key, ts)
    }

    pub fn key_quota_day(&self, rule_id: &str, dim_key: &str, ts: &str) -> String {
        format!("{{{}:q:{}:{}}}:d:{}", self.cfg.prefix, rule_id, dim_key, ts)
    }

    pub fn key_blacklist(&self) -> String {
        format!("{}:blacklist:ip", self.cfg.prefix)
    }

    pub fn key_whitelist(&self) -> String {
        format!("{}:whitelist:ip", self.cfg.prefix)
    }

    pub fn key_hot_ip(&self, ip: &str) -> String {
        format!("{}:hot:ip:{}", self.cfg.prefix, ip)
    }

    pub fn key_temp_blacklist(&self, ip: &str) -> String {
        format!("{}:blacklist:ip:tmp:{}", self.cfg.prefix, ip)
    }

    pub fn key_breaker(&self, rule_id: &str, dim_key: &str, field: &str) -> String {
        format!("{}:brk:{}:{}:{}", self.cfg.prefix, rule_id, dim_key, field)
    }

    // ---- bounded commands ----

    async fn bounded<T, F>(&self, limit: Duration, op: &'static str, fut: F) -> Result<T, RepoError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RepoError::Command {
                op,
                err: e.to_string(),
            }),
            Err(_) => Err(RepoError::Timeout { op }),
        }
    }

    async fn command<T, F>(&self, op: &'static str, fut: F) -> Result<T, RepoError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        self.bounded(self.cfg.command_timeout, op, fut).await
    }

    pub async fn ping(&self) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        self.bounded(self.cfg.connect_timeout, "ping", async move {
            redis::cmd("PING").query_async(&mut conn).await
        })
        .await
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>, RepoError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.command("get", async move { conn.get(&key).await }).await
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.command("set", async move { conn.set(&key, &value).await })
            .await
    }

    /// SET NX; true when the key was absent and has been written.
    pub async fn set_string_nx(&self, key: &str, value: &str) -> Result<bool, RepoError> {
        let mut conn = self.conn.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.command("setnx", async move { conn.set_nx(&key, &value).await })
            .await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let (key, value) = (key.to_string(), value.to_string());
        let secs = ttl.as_secs().max(1);
        self.command("setex", async move { conn.set_ex(&key, &value, secs).await })
            .await
    }

    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>, RepoError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.command("get", async move { conn.get(&key).await }).await
    }

    pub async fn incr(&self, key: &str) -> Result<i64, RepoError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.command("incr", async move { conn.incr(&key, 1i64).await })
            .await
    }

    pub async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.command("pexpire", async move { conn.pexpire(&key, ttl_ms).await })
            .await
    }

    pub async fn del(&self, keys: &[String]) -> Result<(), RepoError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let keys = keys.to_vec();
        self.command("del", async move { conn.del(&keys).await }).await
    }

    pub async fn sismember(&self, set_key: &str, member: &str) -> Result<bool, RepoError> {
        let mut conn = self.conn.clone();
        let (set_key, member) = (set_key.to_string(), member.to_string());
        self.command("sismember", async move { conn.sismember(&set_key, &member).await })
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, RepoError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.command("exists", async move { conn.exists(&key).await })
            .await
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let (channel, message) = (channel.to_string(), message.to_string());
        self.command("publish", async move { conn.publish(&channel, &message).await })
            .await
    }

    /// Cursored SCAN; never a blocking full-key enumeration.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, RepoError> {
        let mut conn = self.conn.clone();
        let pattern = pattern.to_string();
        // A scan walks many pages; give it the connect budget rather than
        // the single-command one.
        self.bounded(self.cfg.connect_timeout, "scan", async move {
            let mut keys = Vec::new();
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok(keys)
        })
        .await
    }

    // ---- scripts ----

    /// INCR with TTL bound to the first increment, atomically.
    pub async fn incr_and_expire(&self, key: &str, ttl: Duration) -> Result<i64, RepoError> {
        let mut conn = self.conn.clone();
        let script = &self.scripts.incr_expire;
        let ttl_ms = (ttl.as_millis() as i64).max(1);
        self.bounded(self.cfg.script_timeout, "incr_expire", async move {
            script.key(key).arg(ttl_ms).invoke_async(&mut conn).await
        })
        .await
    }

    pub async fn run_sliding(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: i64,
    ) -> Result<redis::Value, RepoError> {
        let mut conn = self.conn.clone();
        let script = &self.scripts.sliding;
        self.bounded(self.cfg.script_timeout, "sliding", async move {
            script
                .key(key)
                .arg(now_ms)
                .arg(window_ms)
                .arg(limit)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    pub async fn run_token(
        &self,
        key: &str,
        capacity: i64,
        refill_per_ms: f64,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<redis::Value, RepoError> {
        let mut conn = self.conn.clone();
        let script = &self.scripts.token;
        self.bounded(self.cfg.script_timeout, "token", async move {
            script
                .key(key)
                .arg(capacity)
                .arg(refill_per_ms)
                .arg(now_ms)
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    pub async fn run_leaky(
        &self,
        key: &str,
        rate_per_ms: f64,
        now_ms: i64,
        max_queue: i64,
        ttl_ms: i64,
    ) -> Result<redis::Value, RepoError> {
        let mut conn = self.conn.clone();
        let script = &self.scripts.leaky;
        self.bounded(self.cfg.script_timeout, "leaky", async move {
            script
                .key(key)
                .arg(rate_per_ms)
                .arg(now_ms)
                .arg(max_queue)
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_quota(
        &self,
        hour_key: &str,
        day_key: &str,
        hour_limit: i64,
        day_limit: i64,
        hour_ttl_s: i64,
        day_ttl_s: i64,
        default_remaining: i64,
    ) -> Result<redis::Value, RepoError> {
        let mut conn = self.conn.clone();
        let script = &self.scripts.quota;
        // The quota script bounds its own execution with the 100 ms budget.
        self.bounded(self.cfg.command_timeout, "quota", async move {
            script
                .key(hour_key)
                .key(day_key)
                .arg(hour_limit)
                .arg(day_limit)
                .arg(hour_ttl_s)
                .arg(day_ttl_s)
                .arg(default_remaining)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    /// Dedicated pub/sub connection subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub, RepoError> {
        let mut pubsub =
            tokio::time::timeout(self.cfg.connect_timeout, self.client.get_async_pubsub())
                .await
                .map_err(|_| RepoError::Timeout { op: "subscribe" })?
                .map_err(|e| RepoError::Command {
                    op: "subscribe",
                    err: e.to_string(),
                })?;
        tokio::time::timeout(self.cfg.connect_timeout, pubsub.subscribe(channel))
            .await
            .map_err(|_| RepoError::Timeout { op: "subscribe" })?
            .map_err(|e| RepoError::Command {
                op: "subscribe",
                err: e.to_string(),
            })?;
        Ok(pubsub)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Connects to the Redis named by `REDIS_URL` (default localhost) under
    /// a throwaway prefix; returns None when Redis is unavailable so
    /// integration tests skip silently, like the rest of the suite.
    pub async fn get_test_repo(prefix: &str) -> Option<RedisRepo> {
        let cfg = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            prefix: format!("test:{}:{}", prefix, std::process::id()),
            updates_channel: format!("test_{}_updates_{}", prefix, std::process::id()),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        RedisRepo::new(cfg).await.ok()
    }
}
