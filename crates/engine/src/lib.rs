//! Resilience primitives for guarding unreliable operations.
//!
//! This crate provides **generic, reusable** building blocks for wrapping
//! fallible operations:
//! - **Circuit Breaker**: tracks recent failure/success history per dependency
//!   and rejects calls without executing them while the dependency is assumed
//!   down
//! - **Retry**: bounded attempt loop with fixed or exponential backoff and a
//!   cancellable inter-attempt delay
//! - **Composition**: a retry policy can drive a circuit-breaker-guarded call
//!   as the unit of work for each attempt
//!
//! Every guarded call terminates in a plain `Result` whose failure side is a
//! classified [`FaultError`]; the engine never throws across component
//! boundaries and never silently drops an error.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod retry;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult, FaultError, FaultResult};
pub use retry::{
    policies, retry, retry_with_config, RetryClassifier, RetryConfig, RetryConfigBuilder,
    RetryMetrics, RetryPolicy,
};
