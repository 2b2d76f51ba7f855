//! Ports - trait definitions for the infrastructure the engine drives.
//! `rls-infra` provides the Redis-backed implementations.

mod iplist;
mod limiter;
mod quota;
mod source;

pub use iplist::{IpListError, IpListGate};
pub use limiter::{LimitError, Limiter};
pub use quota::QuotaGate;
pub use source::{RuleSource, RulesPayload, SourceError};
