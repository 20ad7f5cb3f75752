//! Per-dependency circuit breakers
//!
//! One breaker value wraps each failure-prone dependency (cache, archive
//! log, database). A breaker short-circuits calls while its dependency is
//! degraded so the pipeline keeps accepting writes instead of stacking up
//! timeouts.
//!
//! State machine:
//!
//! | From     | Event                                                | To       |
//! |----------|------------------------------------------------------|----------|
//! | Closed   | `requests >= min` and `failures/requests >= threshold` | Open     |
//! | Open     | `open_timeout` elapsed                               | HalfOpen |
//! | HalfOpen | success count reaches `half_open_max_requests`       | Closed   |
//! | HalfOpen | any failure                                          | Open     |
//!
//! Errors are classified before they count: a not-found lookup is not a
//! dependency failure, only transient errors (per [`TransientError`]) trip
//! the breaker.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::core::constants::{BREAKER_HALF_OPEN_MAX_REQUESTS, BREAKER_WINDOW_SECS};
use crate::data::error::TransientError;

/// Breaker states; gauge values follow the metric contract
/// (0=Closed, 1=HalfOpen, 2=Open)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    fn gauge_value(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker short-circuited; the dependency was not called
    #[error("circuit breaker '{0}' is open")]
    Open(&'static str),

    /// The dependency was called and returned this error
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }
}

/// Per-dependency tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub name: &'static str,
    /// Failure ratio in the closed window that opens the breaker
    pub failure_rate_threshold: f64,
    /// Completed requests required before the ratio is evaluated
    pub minimum_requests: u64,
    /// Time spent open before probing again
    pub open_timeout: Duration,
    /// Consecutive half-open successes required to close
    pub half_open_max_requests: u32,
    /// Rolling window for closed-state counts
    pub window: Duration,
}

impl BreakerConfig {
    /// Cache breaker: aggressive, cache failures should fail-open quickly
    pub fn cache() -> Self {
        Self {
            name: "cache",
            failure_rate_threshold: 0.4,
            minimum_requests: 5,
            open_timeout: Duration::from_secs(15),
            half_open_max_requests: BREAKER_HALF_OPEN_MAX_REQUESTS,
            window: Duration::from_secs(BREAKER_WINDOW_SECS),
        }
    }

    /// Archive-log breaker: lenient, brokers blip
    pub fn archive() -> Self {
        Self {
            name: "archive",
            failure_rate_threshold: 0.6,
            minimum_requests: 10,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: BREAKER_HALF_OPEN_MAX_REQUESTS,
            window: Duration::from_secs(BREAKER_WINDOW_SECS),
        }
    }

    /// Database breaker: moderate
    pub fn database() -> Self {
        Self {
            name: "database",
            failure_rate_threshold: 0.6,
            minimum_requests: 10,
            open_timeout: Duration::from_secs(45),
            half_open_max_requests: BREAKER_HALF_OPEN_MAX_REQUESTS,
            window: Duration::from_secs(BREAKER_WINDOW_SECS),
        }
    }
}

struct Inner {
    state: BreakerState,
    /// Completed requests in the current closed window
    requests: u64,
    /// Failures in the current closed window
    failures: u64,
    window_started: Instant,
    opened_at: Instant,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

/// Circuit breaker value wrapping one dependency
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let breaker = Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                requests: 0,
                failures: 0,
                window_started: Instant::now(),
                opened_at: Instant::now(),
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
            config,
        };
        breaker.publish_state(BreakerState::Closed);
        breaker
    }

    pub fn name(&self) -> &'static str {
        self.config.name
    }

    /// Current state, applying the open-timeout transition lazily
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        inner.state
    }

    /// Execute `op` under the breaker
    ///
    /// Returns `BreakerError::Open` without calling `op` while the breaker
    /// short-circuits. Non-transient errors from `op` (not-found and the
    /// like) are passed through but counted as successes.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        E: TransientError,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(BreakerError::Open(self.config.name));
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_transient() {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Apply the Open → HalfOpen timeout and the closed-window reset
    fn refresh_locked(&self, inner: &mut Inner) {
        match inner.state {
            BreakerState::Open => {
                if inner.opened_at.elapsed() >= self.config.open_timeout {
                    self.transition(inner, BreakerState::HalfOpen);
                }
            }
            BreakerState::Closed => {
                if inner.window_started.elapsed() >= self.config.window {
                    inner.requests = 0;
                    inner.failures = 0;
                    inner.window_started = Instant::now();
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_requests {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
            }
            BreakerState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_requests {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            // A call that started before the breaker opened
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
                inner.failures += 1;
                if inner.requests >= self.config.minimum_requests {
                    let rate = inner.failures as f64 / inner.requests as f64;
                    if rate >= self.config.failure_rate_threshold {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Instant::now();
                tracing::warn!(
                    breaker = self.config.name,
                    requests = inner.requests,
                    failures = inner.failures,
                    "Circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
                tracing::info!(breaker = self.config.name, "Circuit breaker half-open");
            }
            BreakerState::Closed => {
                inner.requests = 0;
                inner.failures = 0;
                inner.window_started = Instant::now();
                tracing::info!(breaker = self.config.name, "Circuit breaker closed");
            }
        }
        self.publish_state(to);
    }

    fn publish_state(&self, state: BreakerState) {
        metrics::gauge!("breaker_state", "dependency" => self.config.name)
            .set(state.gauge_value());
    }
}

/// The three dependency breakers, shared across the pipeline, sessions,
/// and queue workers
pub struct Breakers {
    pub cache: CircuitBreaker,
    pub archive: CircuitBreaker,
    pub database: CircuitBreaker,
}

impl Breakers {
    pub fn new() -> Self {
        Self {
            cache: CircuitBreaker::new(BreakerConfig::cache()),
            archive: CircuitBreaker::new(BreakerConfig::archive()),
            database: CircuitBreaker::new(BreakerConfig::database()),
        }
    }
}

impl Default for Breakers {
    fn default() -> Self {
        Self::new()
    }
}
