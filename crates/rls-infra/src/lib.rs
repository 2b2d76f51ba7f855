//! # RLS Infrastructure
//!
//! Redis-backed implementations of the ports defined in `rls-core`:
//! the shared-state repository, the three atomic limiter algorithms, the
//! per-key circuit breaker, the two-level IP list cache, the quota
//! controller, and the rule store with its watcher and poller.

pub mod iplist;
pub mod limiter;
pub mod quota;
pub mod repo;
pub mod rules;

pub use iplist::{IpListCache, IpListConfig};
pub use limiter::{BreakerLimiter, LeakyBucket, LimiterMux, SlidingWindow, TokenBucket};
pub use quota::QuotaController;
pub use repo::{RedisConfig, RedisRepo, RepoError};
pub use rules::{HttpRuleSource, Poller, RuleStore, SourceSettings};
