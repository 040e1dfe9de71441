//! Circuit breaker guarding an external dependency shared by all sources,
//! such as the AI content-extraction service used by the fallback strategy.
//!
//! ```text
//! CLOSED --[N tripping failures]--> OPEN --[cool-down]--> HALF_OPEN
//!   ^                                 ^                      |
//!   |                                 +------[failure]-------+
//!   +---------------------------------------[success]--------+
//! ```
//!
//! Every re-open doubles the cool-down, up to `max_open_for`.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive tripping failures that open the circuit.
    pub failure_threshold: u32,
    /// Initial cool-down before a probe is let through.
    pub open_for: Duration,
    pub max_open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_for: Duration::from_secs(60),
            max_open_for: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit '{name}' is open, retry in {}s", retry_after.as_secs())]
    Open { name: String, retry_after: Duration },
    #[error(transparent)]
    Inner(#[from] AppError),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    open_for: Duration,
}

/// Cloneable handle; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        let inner = Inner {
            state: CircuitState::Closed,
            failures: 0,
            opened_at: None,
            open_for: config.open_for,
        };
        Self {
            name: Arc::from(name),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the counters invalid.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        Self::refresh(&mut inner);
        inner.state
    }

    fn refresh(inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= inner.open_for)
        {
            inner.state = CircuitState::HalfOpen;
        }
    }

    /// Run `operation` unless the circuit is open.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        {
            let mut inner = self.lock();
            Self::refresh(&mut inner);
            if inner.state == CircuitState::Open {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                return Err(CircuitBreakerError::Open {
                    name: self.name.to_string(),
                    retry_after: inner.open_for.saturating_sub(elapsed),
                });
            }
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) if e.should_trip_circuit() => self.on_failure(e),
            Err(_) => {}
        }
        result.map_err(CircuitBreakerError::Inner)
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(circuit = %self.name, "Circuit closed after successful probe");
            inner.open_for = self.config.open_for;
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self, error: &AppError) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failures,
                        error = %error,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.open_for = (inner.open_for * 2).min(self.config.max_open_for);
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    open_for_secs = inner.open_for.as_secs(),
                    "Probe failed, circuit re-opened"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }
}
