//! Circuit Breaker Implementation
//!
//! Implements the circuit breaker pattern to stop calling a remote target
//! that keeps failing. The circuit breaker has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Too many failures, requests are rejected immediately
//! - HalfOpen: One probe request is in flight, everyone else is rejected
//!
//! State transitions:
//! - Closed → Open: After consecutive failures reach the threshold
//! - Open → HalfOpen: First request after the open timeout becomes the probe
//! - HalfOpen → Closed: Probe succeeded
//! - HalfOpen → Open: Probe failed (or was abandoned)
//!
//! Admission hands out a `CircuitPermit`. The caller settles it with
//! `succeed` or `fail`; a probe permit dropped unsettled reopens the circuit
//! without restarting the open timeout.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use velroute_core::HybridSettings;
use velroute_observability::CircuitBreakerState;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed = 0,
    /// Failing - requests rejected immediately
    Open = 1,
    /// Probing recovery - exactly one request in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl From<CircuitState> for CircuitBreakerState {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => CircuitBreakerState::Closed,
            CircuitState::Open => CircuitBreakerState::Open,
            CircuitState::HalfOpen => CircuitBreakerState::HalfOpen,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before admitting a probe
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&HybridSettings> for CircuitBreakerConfig {
    fn from(settings: &HybridSettings) -> Self {
        Self {
            failure_threshold: settings.circuit_breaker_failure_threshold.max(1),
            timeout: settings.circuit_breaker_timeout(),
        }
    }
}

/// Called with `(from, to)` on every state change
///
/// Runs while the breaker's transition lock is held, so hooks observe changes
/// in order. A hook must not call back into the breaker.
pub type TransitionHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker implementation
///
/// Thread-safe; state and counters are atomics. `opened_at` sits behind a
/// short-lived mutex that also serializes state transitions.
pub struct CircuitBreaker {
    /// Current circuit state (encoded as u8 for atomic operations)
    state: AtomicU8,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Consecutive failure count while closed
    consecutive_failures: AtomicU32,
    /// When the circuit last opened
    opened_at: Mutex<Option<Instant>>,
    on_transition: Option<TransitionHook>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            on_transition: None,
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Observe state changes (metrics, logging)
    pub fn with_transition_hook(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get the number of consecutive failures
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Time since the circuit last opened, if it ever did
    pub fn time_since_opened(&self) -> Option<Duration> {
        self.lock_opened_at().map(|opened| opened.elapsed())
    }

    /// Ask to send one request
    ///
    /// Returns `None` when the request must fail fast: the circuit is open and
    /// the timeout has not elapsed, or a probe is already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CircuitPermit> {
        match self.state() {
            CircuitState::Closed => Some(CircuitPermit::new(Arc::clone(self), false)),
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let opened_at = self.lock_opened_at();
                if let Some(opened) = *opened_at
                    && opened.elapsed() < self.config.timeout
                {
                    return None;
                }

                // Only one caller wins the probe slot
                if self.compare_and_set(CircuitState::Open, CircuitState::HalfOpen) {
                    self.notify(CircuitState::Open, CircuitState::HalfOpen);
                    drop(opened_at);
                    tracing::info!("Circuit breaker half-open (probing recovery)");
                    Some(CircuitPermit::new(Arc::clone(self), true))
                } else {
                    drop(opened_at);
                    // A concurrent probe settled between the load and the swap
                    match self.state() {
                        CircuitState::Closed => Some(CircuitPermit::new(Arc::clone(self), false)),
                        _ => None,
                    }
                }
            }
        }
    }

    /// Force the circuit to open (useful for testing or manual intervention)
    pub fn force_open(&self) {
        let mut opened_at = self.lock_opened_at();
        let from = self.state();
        *opened_at = Some(Instant::now());
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        if from != CircuitState::Open {
            self.notify(from, CircuitState::Open);
        }
    }

    /// Force the circuit to close (useful for testing or manual intervention)
    pub fn force_close(&self) {
        let mut opened_at = self.lock_opened_at();
        let from = self.state();
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        *opened_at = None;
        if from != CircuitState::Closed {
            self.notify(from, CircuitState::Closed);
        }
    }

    fn record_success(&self, probe: bool) {
        if probe {
            let mut opened_at = self.lock_opened_at();
            if self.compare_and_set(CircuitState::HalfOpen, CircuitState::Closed) {
                self.consecutive_failures.store(0, Ordering::Release);
                *opened_at = None;
                self.notify(CircuitState::HalfOpen, CircuitState::Closed);
                drop(opened_at);
                tracing::info!("Circuit breaker closed (recovered)");
            }
        } else if self.state() == CircuitState::Closed {
            self.consecutive_failures.store(0, Ordering::Release);
        }
    }

    fn record_failure(&self, probe: bool) {
        if probe {
            if self.open_from(CircuitState::HalfOpen) {
                tracing::warn!("Circuit breaker probe failed, reopening");
            }
            return;
        }

        if self.state() != CircuitState::Closed {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold && self.open_from(CircuitState::Closed) {
            tracing::warn!(failures, "Circuit breaker opened");
        }
    }

    /// An unsettled probe: reopen, keeping the old `opened_at` so the next caller can probe
    fn abandon_probe(&self) {
        let guard = self.lock_opened_at();
        if self.compare_and_set(CircuitState::HalfOpen, CircuitState::Open) {
            self.notify(CircuitState::HalfOpen, CircuitState::Open);
            drop(guard);
            tracing::debug!("Circuit breaker probe abandoned");
        }
    }

    fn open_from(&self, from: CircuitState) -> bool {
        let mut opened_at = self.lock_opened_at();
        if !self.compare_and_set(from, CircuitState::Open) {
            return false;
        }
        *opened_at = Some(Instant::now());
        self.consecutive_failures.store(0, Ordering::Release);
        self.notify(from, CircuitState::Open);
        true
    }

    fn compare_and_set(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn lock_opened_at(&self) -> MutexGuard<'_, Option<Instant>> {
        self.opened_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        if let Some(hook) = &self.on_transition {
            hook(from, to);
        }
    }
}

/// Wrapper that can be shared across threads
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

/// Admission ticket for one request through a breaker
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this request is the single half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

impl fmt::Debug for CircuitPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitPermit")
            .field("probe", &self.probe)
            .field("settled", &self.settled)
            .finish()
    }
}
