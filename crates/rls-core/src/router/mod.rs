//! Route index and matcher.
//!
//! Rules are indexed three ways: exact path, character-trie prefix, and
//! wildcard. Matching returns every candidate whose prefix covers the
//! request path (not only the longest), filtered by method and client kind,
//! sorted by priority.

mod matcher;
mod snapshot;

pub use matcher::{Matcher, RequestCtx};
pub use snapshot::RouteSnapshot;
