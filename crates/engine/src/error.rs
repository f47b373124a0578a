//! Error taxonomy for guarded operations
//!
//! Every guarded call terminates in either the operation's own value or a
//! classified failure. The engine catches, classifies, and returns failures
//! as values; it never throws across component boundaries and never silently
//! drops an error.

use std::time::Duration;

use thiserror::Error;

/// Configuration error raised at construction time
///
/// Malformed configuration (for example `max_attempts < 1`) fails fast when
/// the config is built, never at call time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type for configuration construction
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Classified failure produced by a guarded call
///
/// This error type is generic over the underlying operation error type `E`,
/// preserving the original error while adding the classification the circuit
/// breaker and retry loop act on.
#[derive(Debug, Error)]
pub enum FaultError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Call rejected without execution because the breaker is open
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Operation did not complete within the configured time budget
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The wrapped operation itself failed
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// No operation was supplied
    #[error("No operation was supplied")]
    InvalidOperation,

    /// The calling task was cancelled, either during operation execution or
    /// during a retry delay
    #[error("Operation cancelled")]
    Cancelled,

    /// Retry attempts were exhausted without an acceptable result
    #[error("All retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
}

impl<E> FaultError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Default retry classification for this failure kind
    ///
    /// Operation failures and timeouts are assumed transient; rejections,
    /// cancellations, and programming errors are not. Callers needing
    /// different behavior supply their own classifier.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationFailed { .. } | Self::Timeout { .. })
    }

    /// Whether this failure was produced without invoking the operation
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::InvalidOperation)
    }
}

/// Result type for guarded operations
pub type FaultResult<T, E> = Result<T, FaultError<E>>;
