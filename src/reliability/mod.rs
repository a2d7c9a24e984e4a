//! Admission control and fault isolation for outbound requests.

mod circuit_breaker;
mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;

use crate::config::secs_to_duration;
use std::time::Duration;

/// `min(base * 2^attempt, max)`, both in seconds. Saturates at `Duration::MAX`.
pub fn backoff_delay(attempt: u32, base_secs: f64, max_secs: f64) -> Duration {
    let exp = attempt.min(1023) as i32;
    secs_to_duration((base_secs * 2f64.powi(exp)).min(max_secs))
}
