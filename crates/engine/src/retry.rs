//! Bounded retry with configurable backoff
//!
//! A retry policy drives 1..N attempts of a fallible operation, classifying
//! each outcome through a [`RetryClassifier`]: a non-retryable failure ends
//! the loop immediately, a retryable one triggers a cancellable inter-attempt
//! delay, and exhaustion surfaces the most recent attempt's failure verbatim.
//!
//! Composed with a [`CircuitBreaker`], each attempt's unit of work is the
//! guarded call, so an open-circuit rejection flows through the same
//! classification as any other failure.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::error::{ConfigError, ConfigResult, FaultError, FaultResult};

/// Classifier deciding whether an attempt's outcome warrants another try
///
/// `retry_on_failure` inspects a classified failure; `retry_on_result`
/// inspects a successful value and may force a retry anyway (for example
/// "success but empty payload"). Defaults retry the transient failure kinds
/// and accept every successful result.
pub trait RetryClassifier<T, E>: Send + Sync
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether a failed attempt should be retried
    fn retry_on_failure(&self, error: &FaultError<E>) -> bool {
        error.is_retryable()
    }

    /// Whether a successful result should be retried anyway
    fn retry_on_result(&self, _value: &T) -> bool {
        false
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Identifier used for diagnostics
    pub name: String,
    /// Maximum number of attempts, including the first (>= 1)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub wait_duration: Duration,
    /// Growth factor applied to the delay after each attempt; `0.0` disables
    /// backoff and every delay equals `wait_duration`
    pub backoff_multiplier: f64,
    /// Optional upper bound on any single computed delay
    pub max_wait_duration: Option<Duration>,
    /// Whether exhausting attempts on a result the classifier keeps
    /// rejecting yields a failure (`true`) or that last result (`false`)
    pub fail_after_max_attempts: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "retry".to_string(),
            max_attempts: 3,
            wait_duration: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_wait_duration: Some(Duration::from_secs(30)),
            fail_after_max_attempts: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be at least 1".to_string(),
            });
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            return Err(ConfigError::Invalid {
                message: "backoff_multiplier must be a finite non-negative number".to_string(),
            });
        }

        Ok(())
    }

    /// Compute the delay inserted after the given completed attempt
    /// (1-indexed)
    ///
    /// The delay before attempt `k` (k > 1) is
    /// `wait_duration * backoff_multiplier^(k - 2)`, clamped to
    /// `max_wait_duration` when set. With backoff disabled every delay is
    /// `wait_duration`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.backoff_multiplier == 0.0 {
            self.wait_duration
        } else {
            let exponent = attempt.saturating_sub(1) as i32;
            let scaled = self.wait_duration.as_secs_f64() * self.backoff_multiplier.powi(exponent);
            Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
        };

        match self.max_wait_duration {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn wait_duration(mut self, wait: Duration) -> Self {
        self.config.wait_duration = wait;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Disable backoff; every inter-attempt delay equals the base wait
    pub fn no_backoff(mut self) -> Self {
        self.config.backoff_multiplier = 0.0;
        self
    }

    pub fn max_wait_duration(mut self, cap: Duration) -> Self {
        self.config.max_wait_duration = Some(cap);
        self
    }

    /// Remove the cap on computed delays
    pub fn unbounded_wait(mut self) -> Self {
        self.config.max_wait_duration = None;
        self
    }

    pub fn fail_after_max_attempts(mut self, fail: bool) -> Self {
        self.config.fail_after_max_attempts = fail;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Counters accumulated across executions of one policy
#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    /// Number of individual attempts made
    pub attempts_made: u64,
    /// Number of executions that terminated successfully
    pub success_count: u64,
    /// Number of executions that terminated in a failure
    pub failure_count: u64,
}

impl fmt::Display for RetryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryMetrics {{ attempts_made: {}, success_count: {}, failure_count: {} }}",
            self.attempts_made, self.success_count, self.failure_count
        )
    }
}

/// Retry executor driving the bounded attempt loop
///
/// Immutable once built; carries no per-call state, so one policy instance
/// can serve many concurrent callers. Only the aggregate metrics counters
/// are shared.
pub struct RetryPolicy<P> {
    config: RetryConfig,
    classifier: P,
    attempts_made: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl<P> fmt::Debug for RetryPolicy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config).finish()
    }
}

impl<P> RetryPolicy<P> {
    /// Create a new retry policy with the given configuration and classifier
    ///
    /// Configuration is validated where it is built
    /// ([`RetryConfigBuilder::build`]); pairing a config with a classifier
    /// cannot fail.
    pub fn new(config: RetryConfig, classifier: P) -> Self {
        Self {
            config,
            classifier,
            attempts_made: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Create with the default configuration
    pub fn with_classifier(classifier: P) -> Self {
        Self::new(RetryConfig::default(), classifier)
    }

    /// The policy's configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Snapshot of the counters accumulated so far
    pub fn metrics(&self) -> RetryMetrics {
        RetryMetrics {
            attempts_made: self.attempts_made.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            failure_count: self.failure_count.load(Ordering::Acquire),
        }
    }

    /// Execute an operation with retry logic
    #[instrument(skip(self, operation), fields(policy = %self.config.name, max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> FaultResult<T, E>
    where
        P: RetryClassifier<T, E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(None, || {
            let fut = operation();
            async move { fut.await.map_err(|source| FaultError::OperationFailed { source }) }
        })
        .await
    }

    /// Execute an operation with retry logic, aborting on cancellation
    ///
    /// The token is checked before every attempt and raced against the
    /// inter-attempt delay; cancellation aborts the loop immediately with
    /// [`FaultError::Cancelled`] rather than finishing a partial delay.
    #[instrument(skip(self, token, operation), fields(policy = %self.config.name))]
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        mut operation: F,
    ) -> FaultResult<T, E>
    where
        P: RetryClassifier<T, E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(Some(token), || {
            let fut = operation();
            async move { fut.await.map_err(|source| FaultError::OperationFailed { source }) }
        })
        .await
    }

    /// Execute an operation with no return value (convenience method)
    pub async fn execute_void<F, Fut, E>(&self, operation: F) -> FaultResult<(), E>
    where
        P: RetryClassifier<(), E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute(operation).await
    }

    /// Execute an operation where each attempt goes through a circuit breaker
    ///
    /// A rejection by an open circuit is classified by `retry_on_failure`
    /// like any other failure; callers that want retries to stop while the
    /// circuit is open encode that in their classifier.
    #[instrument(
        skip(self, breaker, operation),
        fields(policy = %self.config.name, breaker = %breaker.name())
    )]
    pub async fn execute_with_circuit_breaker<C, F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker<C>,
        mut operation: F,
    ) -> FaultResult<T, E>
    where
        P: RetryClassifier<T, E>,
        C: Clock,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(None, || {
            let fut = operation();
            breaker.execute(move || fut)
        })
        .await
    }

    /// Circuit-breaker composition with cancellation support
    #[instrument(
        skip(self, token, breaker, operation),
        fields(policy = %self.config.name, breaker = %breaker.name())
    )]
    pub async fn execute_with_circuit_breaker_cancellable<C, F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        breaker: &CircuitBreaker<C>,
        mut operation: F,
    ) -> FaultResult<T, E>
    where
        P: RetryClassifier<T, E>,
        C: Clock,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(Some(token), || {
            let fut = operation();
            breaker.execute_cancellable(token, move || fut)
        })
        .await
    }

    /// The attempt loop, 1-indexed up to `max_attempts`
    async fn run<A, Fut, T, E>(
        &self,
        token: Option<&CancellationToken>,
        mut attempt_unit: A,
    ) -> FaultResult<T, E>
    where
        P: RetryClassifier<T, E>,
        A: FnMut() -> Fut,
        Fut: Future<Output = FaultResult<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt: u32 = 1;
        loop {
            if let Some(token) = token {
                if token.is_cancelled() {
                    self.failure_count.fetch_add(1, Ordering::Relaxed);
                    debug!(policy = %self.config.name, "Retry loop cancelled before attempt {}", attempt);
                    return Err(FaultError::Cancelled);
                }
            }

            self.attempts_made.fetch_add(1, Ordering::Relaxed);
            debug!(
                policy = %self.config.name,
                "Executing operation (attempt {}/{})", attempt, self.config.max_attempts
            );

            match attempt_unit().await {
                Ok(value) => {
                    if !self.classifier.retry_on_result(&value) {
                        if attempt > 1 {
                            debug!(
                                policy = %self.config.name,
                                "Operation succeeded on attempt {}", attempt
                            );
                        }
                        self.success_count.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }

                    if attempt >= self.config.max_attempts {
                        return if self.config.fail_after_max_attempts {
                            self.failure_count.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                policy = %self.config.name,
                                "Result still rejected after {} attempts", attempt
                            );
                            Err(FaultError::RetriesExhausted { attempts: attempt })
                        } else {
                            self.success_count.fetch_add(1, Ordering::Relaxed);
                            Ok(value)
                        };
                    }

                    debug!(policy = %self.config.name, "Result flagged for retry");
                }
                Err(error) => {
                    if !self.classifier.retry_on_failure(&error) {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                        debug!(policy = %self.config.name, "Failure classified non-retryable");
                        return Err(error);
                    }

                    if attempt >= self.config.max_attempts {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            policy = %self.config.name,
                            "All retry attempts exhausted after {} tries", attempt
                        );
                        return Err(error);
                    }
                }
            }

            let delay = self.config.delay_after_attempt(attempt);
            warn!(
                policy = %self.config.name,
                "Attempt {} failed, retrying after {:?}", attempt, delay
            );

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.failure_count.fetch_add(1, Ordering::Relaxed);
                            debug!(policy = %self.config.name, "Retry delay cancelled");
                            return Err(FaultError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}

/// Convenience function to run an operation under an ad-hoc retry policy
pub async fn retry_with_config<F, Fut, T, E, P>(
    config: RetryConfig,
    classifier: P,
    operation: F,
) -> FaultResult<T, E>
where
    P: RetryClassifier<T, E>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    RetryPolicy::new(config, classifier).execute(operation).await
}

/// Convenience function to retry with the default configuration
pub async fn retry<F, Fut, T, E, P>(classifier: P, operation: F) -> FaultResult<T, E>
where
    P: RetryClassifier<T, E>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    retry_with_config(RetryConfig::default(), classifier, operation).await
}

/// Pre-defined classifiers for common scenarios
pub mod policies {
    use super::{FaultError, RetryClassifier};

    /// Default classification: transient failure kinds retry, terminal kinds
    /// stop, every successful result is accepted
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TransientRetry;

    impl<T, E> RetryClassifier<T, E> for TransientRetry where
        E: std::error::Error + Send + Sync + 'static
    {
    }

    /// Always retry - retries on any failure kind
    #[derive(Debug, Clone, Copy)]
    pub struct AlwaysRetry;

    impl<T, E> RetryClassifier<T, E> for AlwaysRetry
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        fn retry_on_failure(&self, _error: &FaultError<E>) -> bool {
            true
        }
    }

    /// Never retry - every failure is terminal
    #[derive(Debug, Clone, Copy)]
    pub struct NeverRetry;

    impl<T, E> RetryClassifier<T, E> for NeverRetry
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        fn retry_on_failure(&self, _error: &FaultError<E>) -> bool {
            false
        }
    }

    /// Failure-predicate classifier
    #[derive(Debug)]
    pub struct RetryIf<F> {
        predicate: F,
    }

    impl<F> RetryIf<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<T, E, F> RetryClassifier<T, E> for RetryIf<F>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&FaultError<E>) -> bool + Send + Sync,
    {
        fn retry_on_failure(&self, error: &FaultError<E>) -> bool {
            (self.predicate)(error)
        }
    }

    /// Classifier with both a failure predicate and a result predicate
    ///
    /// The result predicate returning `true` forces a retry of a successful
    /// attempt.
    #[derive(Debug)]
    pub struct RetryIfWithResult<F, G> {
        on_failure: F,
        on_result: G,
    }

    impl<F, G> RetryIfWithResult<F, G> {
        pub fn new(on_failure: F, on_result: G) -> Self {
            Self { on_failure, on_result }
        }
    }

    impl<T, E, F, G> RetryClassifier<T, E> for RetryIfWithResult<F, G>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&FaultError<E>) -> bool + Send + Sync,
        G: Fn(&T) -> bool + Send + Sync,
    {
        fn retry_on_failure(&self, error: &FaultError<E>) -> bool {
            (self.on_failure)(error)
        }

        fn retry_on_result(&self, value: &T) -> bool {
            (self.on_result)(value)
        }
    }
}
