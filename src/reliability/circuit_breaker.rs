//! Three-state circuit breaker.
//!
//! CLOSED -> OPEN after `failure_threshold` consecutive failures. OPEN rejects every call
//! until `recovery_timeout` has passed since the last failure, then admits a single trial
//! (HALF_OPEN). A successful trial closes the breaker, a failed one reopens it.

use crate::error::TransportError;
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

/// Clears the half-open trial slot if the trial future is dropped before completing.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Run `op` under breaker protection. Returns [`TransportError::CircuitOpen`] without
    /// invoking `op` while the breaker is open. Any error from `op` is recorded as a
    /// failure and returned unchanged.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut slot = TrialSlot {
            breaker: self,
            armed: false,
        };
        {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {}
                CircuitState::Open => {
                    let recovered = inner
                        .last_failure
                        .map_or(true, |t| t.elapsed() > self.recovery_timeout);
                    if !recovered {
                        return Err(TransportError::CircuitOpen);
                    }
                    info!("circuit breaker half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    slot.armed = true;
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        return Err(TransportError::CircuitOpen);
                    }
                    inner.trial_in_flight = true;
                    slot.armed = true;
                }
            }
        }

        let result = op().await;
        slot.armed = false;

        let mut inner = self.lock();
        inner.trial_in_flight = false;
        match &result {
            Ok(_) => {
                if inner.state != CircuitState::Closed {
                    info!("circuit breaker closed");
                }
                inner.failure_count = 0;
                inner.state = CircuitState::Closed;
            }
            Err(_) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                if inner.state == CircuitState::HalfOpen
                    || inner.failure_count >= self.failure_threshold
                {
                    if inner.state != CircuitState::Open {
                        warn!(
                            failure_count = inner.failure_count,
                            "circuit breaker opened"
                        );
                    }
                    inner.state = CircuitState::Open;
                }
            }
        }
        result
    }
}
