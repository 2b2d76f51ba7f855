//! IP list port - blacklist/whitelist gate plus hot-IP deny tracking.

use async_trait::async_trait;

use crate::decision::Decision;

#[derive(Debug, thiserror::Error)]
pub enum IpListError {
    #[error("ip list backend error: {0}")]
    Backend(String),
}

/// Gate consulted before any limiter runs. `check_ip` returning
/// `Ok(Some(decision))` means the gate handled the request (allow or deny);
/// `Ok(None)` lets the engine continue to rule evaluation.
#[async_trait]
pub trait IpListGate: Send + Sync {
    async fn check_ip(&self, ip: &str) -> Result<Option<Decision>, IpListError>;

    /// Record a rate-limit denial for hot-IP tracking. Best effort.
    async fn record_deny(&self, ip: &str);
}
