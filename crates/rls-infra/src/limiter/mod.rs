//! Limiter implementations - three atomic algorithms, an algorithm mux,
//! and the per-(rule, dim) circuit breaker wrapper.

mod breaker;
mod leaky;
mod mux;
mod sliding;
mod token;

pub use breaker::BreakerLimiter;
pub use leaky::LeakyBucket;
pub use mux::LimiterMux;
pub use sliding::SlidingWindow;
pub use token::TokenBucket;
