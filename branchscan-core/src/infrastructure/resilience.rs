//! Resilience patterns for calls to external services
//!
//! Every call to the version-control host and the analysis service goes
//! through a [`ResilienceExecutor`], which combines a three-state
//! [`CircuitBreaker`] with [`retry_with_backoff`]. The same retry utility is
//! reused by the request layer with its own predicate.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::errors::ScanSyncError;

/// Substrings that mark an error message as transient at the request layer
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "network error",
    "service unavailable",
];

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted
    Closed,
    /// Calls are rejected without reaching the service
    Open,
    /// One probe at a time is let through to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Time since the last failure before a probe is allowed
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Three-state circuit breaker.
///
/// ```text
///   Closed ──(failure_threshold consecutive failures)──► Open
///     ▲                                                   │
///     │                                    recovery_timeout elapsed,
///     │                                        next call probes
///     │                                                   ▼
///     └──(success_threshold probe successes)──────── HalfOpen
///                                   probe failure ──► Open
/// ```
///
/// State lives behind a mutex that is never held across an await, so one
/// breaker can be shared by every concurrent branch worker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

/// Admission ticket for one call; releases the half-open probe slot if the
/// call is dropped before it reports an outcome.
struct Admission {
    state: Arc<Mutex<BreakerState>>,
    probe: bool,
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.probe {
            lock_state(&self.state).probe_in_flight = false;
        }
    }
}

fn lock_state(state: &Mutex<BreakerState>) -> MutexGuard<'_, BreakerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(BreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                probe_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` under breaker protection.
    ///
    /// When the circuit rejects the call the future is dropped unpolled.
    pub async fn call<Fut, T>(&self, operation: Fut) -> Result<T, ScanSyncError>
    where
        Fut: Future<Output = Result<T, ScanSyncError>>,
    {
        self.call_expecting(operation, |_| false).await
    }

    /// Like [`call`](Self::call), but errors matching `expected` are answers
    /// from a healthy service and count as successes.
    pub async fn call_expecting<Fut, T, P>(&self, operation: Fut, expected: P) -> Result<T, ScanSyncError>
    where
        Fut: Future<Output = Result<T, ScanSyncError>>,
        P: Fn(&ScanSyncError) -> bool,
    {
        let mut admission = self.admit()?;

        let result = operation.await;
        // The outcome below settles the probe slot; the guard must not.
        let probe = std::mem::take(&mut admission.probe);
        match &result {
            Ok(_) => self.on_success(probe),
            Err(error) if expected(error) => self.on_success(probe),
            Err(_) => self.on_failure(probe),
        }
        result
    }

    fn admit(&self) -> Result<Admission, ScanSyncError> {
        let mut state = lock_state(&self.state);

        let probe = match state.current {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let recovered = state
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if !recovered {
                    return Err(self.rejection());
                }
                debug!(circuit = %self.name, "Circuit breaker transitioning to half-open");
                state.current = CircuitState::HalfOpen;
                state.consecutive_successes = 0;
                state.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    return Err(self.rejection());
                }
                state.probe_in_flight = true;
                true
            }
        };

        Ok(Admission {
            state: Arc::clone(&self.state),
            probe,
        })
    }

    fn rejection(&self) -> ScanSyncError {
        ScanSyncError::CircuitOpen {
            circuit: self.name.clone(),
        }
    }

    /// `probe` is true only for the call admitted as the half-open probe;
    /// stragglers admitted while closed never settle the probe.
    fn on_success(&self, probe: bool) {
        let mut state = lock_state(&self.state);

        match state.current {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if !probe => {
                debug!(circuit = %self.name, "Ignoring straggler success while half-open");
            }
            CircuitState::HalfOpen => {
                state.probe_in_flight = false;
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    info!(circuit = %self.name, "Circuit breaker closed after successful probes");
                    state.current = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {
                // A call admitted while closed finished after the circuit opened.
            }
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut state = lock_state(&self.state);

        if state.current == CircuitState::HalfOpen && !probe {
            debug!(circuit = %self.name, "Ignoring straggler failure while half-open");
            return;
        }

        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.last_failure = Some(Instant::now());

        match state.current {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opening due to failures"
                    );
                    state.current = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Probe failed, circuit breaker reopening");
                state.current = CircuitState::Open;
                state.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        lock_state(&self.state).current
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = lock_state(&self.state);
        CircuitBreakerStats {
            state: state.current,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut state = lock_state(&self.state);
        state.current = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.last_failure = None;
        state.probe_in_flight = false;
    }
}

/// Retry configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total tries are `max_attempts + 1`
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Extra message substrings (case-insensitive) treated as transient
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_patterns: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Default policy plus [`DEFAULT_RETRYABLE_PATTERNS`]
    pub fn with_default_patterns() -> Self {
        Self {
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Delay that follows `current`, capped at `max_delay`
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()))
    }

    /// Delays slept before each retry, in order
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts as usize);
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 0..self.max_attempts {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }

    pub fn matches_pattern(&self, error: &ScanSyncError) -> bool {
        if self.retryable_patterns.is_empty() {
            return false;
        }
        let message = error.to_string().to_lowercase();
        self.retryable_patterns
            .iter()
            .any(|pattern| message.contains(&pattern.to_lowercase()))
    }

    /// Typed retryability first, configured patterns second
    pub fn is_retryable(&self, error: &ScanSyncError) -> bool {
        error.is_retryable() || self.matches_pattern(error)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, the
/// policy is exhausted, or `cancel` fires.
///
/// The closure receives the 1-based attempt number. Cancellation is observed
/// while the attempt runs and while sleeping between attempts.
pub async fn retry_with_backoff<F, Fut, T, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: P,
    mut operation: F,
) -> Result<T, ScanSyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ScanSyncError>>,
    P: Fn(&ScanSyncError) -> bool,
{
    let total_attempts = policy.total_attempts();
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ScanSyncError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanSyncError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_cancelled() || !is_retryable(&error) {
            return Err(error);
        }

        if attempt >= total_attempts {
            return Err(ScanSyncError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(error),
            });
        }

        debug!(
            attempt,
            total_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying operation with exponential backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanSyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = policy.next_delay(delay);
    }
}

/// Circuit breaker plus retry policy for one external resource
#[derive(Debug, Clone)]
pub struct ResilienceExecutor {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilienceExecutor {
    pub fn new(name: impl Into<String>, breaker: CircuitBreakerConfig, retry: RetryPolicy) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, breaker),
            retry,
        }
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// Single attempt under breaker protection
    pub async fn execute<Fut, T>(&self, operation: Fut) -> Result<T, ScanSyncError>
    where
        Fut: Future<Output = Result<T, ScanSyncError>>,
    {
        self.breaker.call(operation).await
    }

    /// Retry `operation` with backoff, checking the breaker before every attempt.
    ///
    /// A circuit rejection ends the loop at once without calling the service.
    /// Work should live inside the returned future; the closure itself runs
    /// even when the breaker rejects the attempt.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ScanSyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScanSyncError>>,
    {
        self.execute_with_retry_expecting(cancel, |_| false, operation)
            .await
    }

    /// [`execute_with_retry`](Self::execute_with_retry) where errors matching
    /// `expected` are returned at once and never count against the circuit.
    pub async fn execute_with_retry_expecting<F, Fut, T, P>(
        &self,
        cancel: &CancellationToken,
        expected: P,
        mut operation: F,
    ) -> Result<T, ScanSyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScanSyncError>>,
        P: Fn(&ScanSyncError) -> bool,
    {
        let breaker = &self.breaker;
        let retry = &self.retry;
        let expected = &expected;

        retry_with_backoff(
            retry,
            cancel,
            |error| {
                !expected(error)
                    && !matches!(error.root(), ScanSyncError::CircuitOpen { .. })
                    && retry.is_retryable(error)
            },
            move |_| {
                let attempt = operation();
                breaker.call_expecting(attempt, expected)
            },
        )
        .await
    }

    /// Race `operation` against `timeout`.
    ///
    /// On expiry the operation future is dropped, which cancels it at its
    /// next await point.
    pub async fn execute_with_timeout<Fut, T>(
        &self,
        timeout: Duration,
        operation: Fut,
    ) -> Result<T, ScanSyncError>
    where
        Fut: Future<Output = Result<T, ScanSyncError>>,
    {
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(executor = %self.name(), timeout_ms = timeout.as_millis() as u64, "Operation deadline exceeded");
                Err(ScanSyncError::DeadlineExceeded(timeout))
            }
        }
    }
}
