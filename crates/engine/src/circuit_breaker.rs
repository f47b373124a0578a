//! Circuit breaker for isolating failing dependencies
//!
//! One breaker instance guards one logical dependency and decides, per call,
//! whether to execute the wrapped operation or reject it outright.
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure streak reaches failure_threshold
//! Open → Half-Open: wait_duration_in_open_state elapsed, next call is the trial
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! The decide-and-apply step for every transition runs as a single atomic
//! unit under one mutex; the lock is never held while an operation runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, FaultError, FaultResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing trial requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Identifier used for diagnostics and metrics
    pub name: String,
    /// Number of failures while closed required to open the circuit.
    /// Zero opens the circuit on the very first failure.
    pub failure_threshold: u64,
    /// Consecutive successes while half-open required to close the circuit
    pub success_threshold: u64,
    /// Time budget for a single operation execution
    pub timeout: Duration,
    /// Minimum time the circuit stays open before admitting a trial call
    pub wait_duration_in_open_state: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            wait_duration_in_open_state: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "timeout must be greater than zero".to_string(),
            });
        }

        if self.wait_duration_in_open_state.is_zero() {
            return Err(ConfigError::Invalid {
                message: "wait_duration_in_open_state must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    /// Set a custom clock and build a circuit breaker directly (useful for
    /// testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

/// Immutable circuit breaker metrics snapshot
///
/// Read as a single consistent snapshot; never torn across fields.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
}

/// Mutable breaker state, guarded as one unit
///
/// Counter semantics depend on `state`: while closed, `failure_count` is the
/// current failure streak; while half-open, `success_count` is the trial
/// success streak. Both reset to zero on every transition.
struct BreakerCore {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    opened_at: Option<Instant>,
}

impl BreakerCore {
    fn transition(&mut self, next: CircuitState, opened_at: Option<Instant>) {
        self.state = next;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = opened_at;
    }
}

/// Generic circuit breaker implementation
///
/// Tracks recent failure/success history for one guarded dependency and
/// short-circuits calls while the dependency is assumed down. Operations run
/// under a per-call time budget; every execution outcome drives exactly one
/// state-machine update.
///
/// Cloning is shallow: clones share state and observe the same circuit.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    core: Arc<Mutex<BreakerCore>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("name", &snapshot.name)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .field("success_count", &snapshot.success_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            core: Arc::clone(&self.core),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using the
    /// system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            core: Arc::new(Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            clock: Arc::new(clock),
        })
    }

    /// Identifier of the guarded dependency
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Checks admission, runs the operation under the configured time budget,
    /// and records the outcome to update the circuit state. While the circuit
    /// is open and the wait duration has not elapsed, the operation is never
    /// invoked and the call returns [`FaultError::CircuitOpen`].
    #[instrument(skip(self, operation), fields(breaker = %self.config.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> FaultResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.guarded(None, operation).await
    }

    /// Execute an operation, aborting if the token is cancelled
    ///
    /// Cancellation observed mid-flight is recorded as a failure before it is
    /// returned, so a cancelled trial call still re-opens a half-open
    /// circuit. The token remains cancelled for the caller to observe.
    #[instrument(skip(self, token, operation), fields(breaker = %self.config.name))]
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> FaultResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.guarded(Some(token), operation).await
    }

    /// Execute an operation with no return value (convenience method)
    pub async fn execute_void<F, Fut, E>(&self, operation: F) -> FaultResult<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.guarded(None, operation).await
    }

    async fn guarded<F, Fut, T, E>(
        &self,
        token: Option<&CancellationToken>,
        operation: F,
    ) -> FaultResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        // Pre-execution cancellation is not an execution outcome: it must not
        // consume the half-open trial slot or touch counters.
        if let Some(token) = token {
            if token.is_cancelled() {
                debug!(breaker = %self.config.name, "Call cancelled before execution");
                return Err(FaultError::Cancelled);
            }
        }

        if !self.admit() {
            debug!(breaker = %self.config.name, "Circuit breaker rejecting call");
            return Err(FaultError::CircuitOpen);
        }

        let bounded = tokio::time::timeout(self.config.timeout, operation());

        let outcome = match token {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        self.record_failure();
                        warn!(breaker = %self.config.name, "Operation cancelled mid-flight");
                        return Err(FaultError::Cancelled);
                    }
                    outcome = bounded => outcome,
                }
            }
            None => bounded.await,
        };

        match outcome {
            Ok(Ok(value)) => {
                self.record_success();
                debug!(breaker = %self.config.name, "Operation succeeded");
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure();
                warn!(breaker = %self.config.name, "Operation failed");
                Err(FaultError::OperationFailed { source: error })
            }
            Err(_) => {
                self.record_failure();
                warn!(
                    breaker = %self.config.name,
                    timeout = ?self.config.timeout,
                    "Operation timed out"
                );
                Err(FaultError::Timeout { timeout: self.config.timeout })
            }
        }
    }

    /// Admission decision, atomic with the open-to-half-open edge
    ///
    /// The transition happens before the call runs, so the admitted call is
    /// the first trial of the half-open circuit.
    fn admit(&self) -> bool {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let eligible = core.opened_at.map_or(true, |at| {
                    self.clock.now().duration_since(at) >= self.config.wait_duration_in_open_state
                });
                if eligible {
                    core.transition(CircuitState::HalfOpen, None);
                    info!(
                        breaker = %self.config.name,
                        "Circuit breaker half-open, admitting trial call"
                    );
                }
                eligible
            }
        }
    }

    /// Record a successful operation
    fn record_success(&self) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => {
                // A single success clears the failure streak. Deliberately a
                // streak counter, not a windowed failure rate.
                core.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                core.success_count += 1;
                if core.success_count >= self.config.success_threshold {
                    let successes = core.success_count;
                    core.transition(CircuitState::Closed, None);
                    info!(
                        breaker = %self.config.name,
                        "Circuit breaker closed after {} successful trials", successes
                    );
                }
            }
            CircuitState::Open => {
                // Late completion from a call admitted before the circuit
                // re-opened; the rejection logic already took over.
                warn!(breaker = %self.config.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    fn record_failure(&self) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.config.failure_threshold {
                    let failures = core.failure_count;
                    core.transition(CircuitState::Open, Some(self.clock.now()));
                    warn!(
                        breaker = %self.config.name,
                        "Circuit breaker opened after {} failures", failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the trial phase re-opens immediately.
                core.transition(CircuitState::Open, Some(self.clock.now()));
                warn!(
                    breaker = %self.config.name,
                    "Circuit breaker re-opened after failed trial call"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Get a consistent metrics snapshot
    ///
    /// All fields are read under a single lock acquisition and therefore
    /// describe one instant; the lock is only held for the copy.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let core = self.core.lock();
        CircuitBreakerMetrics {
            name: self.config.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
        }
    }

    /// Reset the circuit breaker to the closed state
    ///
    /// Administrative override, callable at any time from any state.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        core.transition(CircuitState::Closed, None);
        info!(breaker = %self.config.name, "Circuit breaker manually reset to closed state");
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            core: Arc::new(Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            clock: Arc::new(SystemClock),
        }
    }
}
