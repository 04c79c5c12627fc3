//! Per-provider circuit breaker.

use crate::errors::{DispatchError, DispatchResult};
use crate::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT_MS};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time after the last failure before a half-open probe is admitted
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
        }
    }
}

/// Circuit breaker state
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected before dispatch
    Open,
    /// Circuit is half-open, a single probe tests recovery
    HalfOpen,
}

/// Hook for circuit breaker state changes.
///
/// Invoked on every transition, for observability only; it has no effect on
/// whether calls are admitted.
pub trait CircuitBreakerHook: Send + Sync {
    /// Called after the breaker has moved from `old_state` to `new_state`
    fn on_state_change(&self, provider: &str, old_state: CircuitState, new_state: CircuitState);
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
}

/// Per-provider circuit breaker guarding dispatches.
///
/// Tracks consecutive failures against a threshold. While open, calls are
/// rejected with [`DispatchError::CircuitOpen`] until the reset timeout since
/// the last failure has elapsed; the next call is then admitted as a
/// half-open probe whose outcome closes or reopens the circuit.
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the named provider
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_wall: None,
            }),
            hook: None,
        }
    }

    /// Add a hook for circuit breaker state changes
    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Runs `f` through the breaker.
    ///
    /// Rejects with [`DispatchError::CircuitOpen`] without invoking `f` while
    /// the circuit is open and the reset timeout has not elapsed. Otherwise
    /// the call's outcome is recorded against the breaker state.
    pub async fn execute<F, Fut, T>(&self, f: F) -> DispatchResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        self.preflight()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Number of recorded failures since the circuit last closed
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Wall-clock time of the most recent failure
    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_failure_wall
    }

    /// Get the time until an open circuit admits a half-open probe
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        Some(self.config.reset_timeout.saturating_sub(elapsed))
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let change = match inner.state {
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                set_state(&mut inner, CircuitState::Closed)
            }
            // Success while closed leaves the failure count untouched.
            _ => None,
        };
        drop(inner);
        self.notify(change);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_wall = Some(Utc::now());

        let change = match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                set_state(&mut inner, CircuitState::Open)
            }
            CircuitState::HalfOpen => set_state(&mut inner, CircuitState::Open),
            _ => None,
        };
        drop(inner);
        self.notify(change);
    }

    /// Rejects while open, flipping to half-open once the reset timeout since
    /// the last failure has elapsed. The flip happens before the probing call
    /// is attempted.
    fn preflight(&self) -> DispatchResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    let change = set_state(&mut inner, CircuitState::HalfOpen);
                    drop(inner);
                    self.notify(change);
                    Ok(())
                } else {
                    let retry_after = self.config.reset_timeout - elapsed;
                    Err(DispatchError::CircuitOpen {
                        provider: self.provider.clone(),
                        retry_after: Some(retry_after),
                    })
                }
            }
        }
    }

    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        let Some((old, new)) = change else {
            return;
        };

        match new {
            CircuitState::Open => {
                warn!(provider = %self.provider, from = ?old, "circuit opened");
            }
            CircuitState::HalfOpen => {
                info!(provider = %self.provider, "circuit half-open, admitting probe");
            }
            CircuitState::Closed => {
                info!(provider = %self.provider, "circuit closed");
            }
        }

        if let Some(hook) = &self.hook {
            hook.on_state_change(&self.provider, old, new);
        }
    }
}

fn set_state(
    inner: &mut BreakerInner,
    new_state: CircuitState,
) -> Option<(CircuitState, CircuitState)> {
    let old_state = inner.state;
    if old_state == new_state {
        return None;
    }
    inner.state = new_state;
    Some((old_state, new_state))
}
