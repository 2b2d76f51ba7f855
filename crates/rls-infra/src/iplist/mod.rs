//! Two-level IP blacklist/whitelist cache.

mod cache;

pub use cache::{IpListCache, IpListConfig};
