//! Resilience primitives every outbound ledger call is routed through
//!
//! Composition used by the ledger pool: `circuit_breaker -> retry(timeout(call))`,
//! with a token from the shared bucket taken before each attempt.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use rate_limiter::{RateLimiterConfig, TokenBucket};
pub use retry::{retry_with_backoff, RetryConfig};
pub use timeout::with_timeout;
