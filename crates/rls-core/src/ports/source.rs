//! External rule source port - periodic pull of the full rule set.

use async_trait::async_trait;

use crate::rule::Rule;

/// A normalized rule set fetched from an external system.
#[derive(Debug, Clone, Default)]
pub struct RulesPayload {
    pub rules: Vec<Rule>,
    /// Content version; empty disables change gating.
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rule source disabled")]
    Disabled,
    #[error("rule source request failed: {0}")]
    Http(String),
    #[error("rule source returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid rules payload: {0}")]
    Parse(String),
}

#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn fetch(&self) -> Result<RulesPayload, SourceError>;
}
