//! Long-horizon quota enforcement with a process-level breaker guarding
//! the Redis path.

mod breaker;
mod controller;

pub use controller::QuotaController;
