//! Redis access layer: key namespace, timeout-bounded commands, and the
//! atomic server-side scripts.

mod redis;
mod scripts;

pub use self::redis::{RedisConfig, RedisRepo, RepoError};

pub(crate) use scripts::{script_pair, script_triple};

#[cfg(test)]
pub(crate) use self::redis::test_support;
