//! Circuit breaker guarding the primary store
//!
//! The breaker counts consecutive primary-store failures and decides whether
//! the next operation should even be attempted against the primary.
//!
//! ## States
//!
//! - **Closed**: normal operation, the primary is tried
//! - **Open**: the primary is skipped and traffic goes to the secondary
//! - **Half-Open**: the cool-down has elapsed; one trial call decides
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                              │  ▲
//!     │ success        timeout       │  │ failure
//!     │              elapsed (poll)  ▼  │
//!     └──────────────────────────── HalfOpen
//! ```
//!
//! Each transition happens under a short synchronous lock, but the sequence
//! `can_execute()` → call → `record_*()` is not atomic. Concurrent callers may
//! interleave, which only shifts when the breaker flips; each call still
//! records its own outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{defaults, DataLayerConfig};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing over - the primary is not attempted
    Open,
    /// Cool-down elapsed - a trial request is allowed
    HalfOpen,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub threshold: u32,
    /// Time an open circuit waits before allowing a trial call
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            timeout: defaults::duration_secs(defaults::DEFAULT_CIRCUIT_BREAKER_TIMEOUT_SECS),
        }
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitBreakerState,
    pub failures: u32,
    /// Time since the most recent recorded failure
    pub since_last_failure: Option<Duration>,
}

/// Counters accumulated over the breaker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Calls `can_execute` allowed through
    pub allowed_calls: u64,
    /// Calls `can_execute` turned away while open
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Number of times the circuit transitioned into Open
    pub times_opened: u64,
}

struct BreakerInner {
    state: CircuitBreakerState,
    failures: u32,
    last_failure_time: Option<Instant>,
}

/// Consecutive-failure circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,

    allowed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    times_opened: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker with zero failures
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failures: 0,
                last_failure_time: None,
            }),
            allowed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Reset the failure count and close the circuit
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.failures = 0;
        inner.state = CircuitBreakerState::Closed;

        if previous != CircuitBreakerState::Closed {
            info!(breaker = %self.name, from = %previous, "Circuit breaker closed");
        }
    }

    /// Count a failure and open the circuit once the threshold is reached
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());

        if inner.failures >= self.config.threshold {
            let previous = inner.state;
            inner.state = CircuitBreakerState::Open;
            match previous {
                CircuitBreakerState::Closed => {
                    self.times_opened.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "Circuit breaker opening after consecutive failures"
                    );
                }
                CircuitBreakerState::HalfOpen => {
                    self.times_opened.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "Circuit breaker reopening after failed trial"
                    );
                }
                CircuitBreakerState::Open => {}
            }
        }
    }

    /// Whether the guarded dependency should be attempted
    ///
    /// An open circuit whose cool-down has strictly elapsed moves to
    /// half-open and admits the caller.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();

        let allowed = match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|at| at.elapsed() > self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitBreakerState::HalfOpen;
                    info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                }
                elapsed
            }
        };

        if allowed {
            self.allowed_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(breaker = %self.name, "Circuit breaker open, rejecting call");
        }
        allowed
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            since_last_failure: inner.last_failure_time.map(|at| at.elapsed()),
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            allowed_calls: self.allowed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit open, e.g. during planned primary maintenance
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Open {
            self.times_opened.fetch_add(1, Ordering::Relaxed);
        }
        inner.state = CircuitBreakerState::Open;
        inner.failures = inner.failures.max(self.config.threshold);
        inner.last_failure_time = Some(Instant::now());
        warn!(breaker = %self.name, "Circuit breaker forcibly opened");
    }

    /// Return to the initial closed state, keeping lifetime counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.failures = 0;
        inner.last_failure_time = None;
        info!(breaker = %self.name, "Circuit breaker reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &snapshot.state)
            .field("failures", &snapshot.failures)
            .finish()
    }
}

pub const GLOBAL_BREAKER_NAME: &str = "primary-store";

static GLOBAL_BREAKER: OnceCell<Arc<CircuitBreaker>> = OnceCell::new();

/// Install the process-wide breaker; returns false if one already exists
pub fn init_global(config: CircuitBreakerConfig) -> bool {
    GLOBAL_BREAKER
        .set(Arc::new(CircuitBreaker::new(GLOBAL_BREAKER_NAME, config)))
        .is_ok()
}

/// The process-wide breaker, created from the environment on first use
pub fn global() -> Arc<CircuitBreaker> {
    GLOBAL_BREAKER
        .get_or_init(|| {
            let config = match DataLayerConfig::from_env() {
                Ok(config) => config.circuit_breaker_config(),
                Err(e) => {
                    warn!(error = %e, "Invalid circuit breaker configuration, using defaults");
                    CircuitBreakerConfig::default()
                }
            };
            Arc::new(CircuitBreaker::new(GLOBAL_BREAKER_NAME, config))
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                threshold,
                timeout: Duration::from_secs(timeout_secs),
            },
        )
    }

    #[test]
    fn test_starts_closed() {
        let breaker = breaker(3, 300);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failures(), 0);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = breaker(3, 300);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failures(), 3);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.stats().times_opened, 1);
    }

    #[test]
    fn test_success_resets_from_any_state() {
        let breaker = breaker(2, 300);
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout() {
        let breaker = breaker(3, 300);
        for _ in 0..3 {
            breaker.record_failure();
        }

        advance(Duration::from_secs(299)).await;
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        // strictly greater than the timeout
        advance(Duration::from_secs(2)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        // half-open keeps admitting until an outcome is recorded
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_restarts_window() {
        let breaker = breaker(3, 300);
        for _ in 0..3 {
            breaker.record_failure();
        }
        advance(Duration::from_secs(301)).await;
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failures(), 4);
        assert_eq!(breaker.stats().times_opened, 2);

        advance(Duration::from_secs(200)).await;
        assert!(!breaker.can_execute());

        advance(Duration::from_secs(101)).await;
        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_stats_track_rejections() {
        let breaker = breaker(1, 300);
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert!(!breaker.can_execute());
        assert!(!breaker.can_execute());

        let stats = breaker.stats();
        assert_eq!(stats.allowed_calls, 1);
        assert_eq!(stats.rejected_calls, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_force_open_keeps_invariant() {
        let breaker = breaker(3, 300);
        breaker.force_open();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitBreakerState::Open);
        assert!(snapshot.failures >= 3);
        assert!(snapshot.since_last_failure.is_some());

        breaker.reset();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.snapshot().since_last_failure, None);
    }
}
