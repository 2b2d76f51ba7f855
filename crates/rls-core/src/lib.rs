//! # RLS Core
//!
//! The domain layer of the rate-limiting service: rule model, route
//! matching, dimension hashing, and the decision engine. This crate has no
//! infrastructure dependencies; Redis-backed behavior lives behind the
//! traits in [`ports`].

pub mod decision;
pub mod dims;
pub mod engine;
pub mod identity;
pub mod ports;
pub mod router;
pub mod rule;
pub mod snapshot;

pub use decision::Decision;
pub use engine::{Engine, FailPolicy};
pub use rule::{Algorithm, BreakerSettings, QuotaLimits, Rule, RuleSnapshot};
