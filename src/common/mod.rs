//! Fault tolerance for the broker client
//!
//! Shared pieces wrapped around every REST call:
//! - Circuit breaker that stops hammering a broker that keeps failing
//! - Token bucket rate limiter to stay inside the API's request budget

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use rate_limiter::RateLimiter;
