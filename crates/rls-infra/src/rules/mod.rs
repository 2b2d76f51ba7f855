//! Rule persistence, hot reload, and external source polling.

mod poller;
mod source;
mod store;

pub use poller::Poller;
pub use source::{HttpRuleSource, SourceSettings};
pub use store::{RuleStore, StoreError};
