//! Limiter port - one atomic allow/deny evaluation for a (rule, dim) pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::decision::Decision;
use crate::rule::Rule;

/// Errors a limiter evaluation can surface. The engine folds these under
/// the process fail policy.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("missing required dimension: {0}")]
    MissingDimension(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("limiter eval failed: {0}")]
    Backend(String),
    #[error("invalid script response: {0}")]
    InvalidScriptResponse(String),
}

/// A rate-limiter evaluated against shared state. `dim_key` is the stable
/// hash of the rule's ordered dimension values.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError>;
}
