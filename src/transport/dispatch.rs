//! Shared retry routine: rate limiter, then circuit breaker, then exponential backoff.

use super::response::Response;
use crate::config::AgentConfig;
use crate::error::TransportError;
use crate::reliability::{backoff_delay, CircuitBreaker, RateLimiter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

pub(crate) struct Dispatcher {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry_attempts: u32,
    backoff_base_secs: f64,
    max_backoff_secs: f64,
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(config: &AgentConfig) -> Self {
        let r = &config.reliability;
        Self {
            limiter: RateLimiter::new(r.rate_limit_calls, r.rate_limit_window()),
            breaker: CircuitBreaker::new(r.failure_threshold, r.recovery_timeout()),
            retry_attempts: config.retry_attempts,
            backoff_base_secs: config.backoff_factor,
            max_backoff_secs: r.max_backoff_secs,
            requests_sent: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    pub(crate) fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub(crate) fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `op` up to `retry_attempts + 1` times and return the first response `accept`
    /// takes. A rate-limit wait does not use up an attempt. Raised errors back off before
    /// the next attempt; unaccepted responses move straight on to it.
    pub(crate) async fn execute<F, Fut>(
        &self,
        kind: &str,
        mut op: F,
        accept: fn(&Response) -> bool,
    ) -> Option<Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response, TransportError>>,
    {
        for attempt in 0..=self.retry_attempts {
            self.wait_for_slot().await;

            match self.breaker.call(|| op()).await {
                Ok(response) if accept(&response) => {
                    self.requests_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(kind, attempt = attempt + 1, "request succeeded");
                    return Some(response);
                }
                Ok(response) => {
                    self.record_failure();
                    warn!(kind, attempt = attempt + 1, ?response, "request not accepted");
                }
                Err(e) if !e.is_retryable() => {
                    self.record_failure();
                    error!(kind, error = %e, "request failed, not retrying");
                    return None;
                }
                Err(e) => {
                    warn!(kind, attempt = attempt + 1, error = %e, "request attempt failed");
                    if attempt < self.retry_attempts {
                        let delay =
                            backoff_delay(attempt, self.backoff_base_secs, self.max_backoff_secs);
                        tokio::time::sleep(delay).await;
                    } else {
                        self.record_failure();
                        error!(kind, "All retry attempts failed");
                    }
                }
            }
        }
        None
    }

    async fn wait_for_slot(&self) {
        while !self.limiter.acquire() {
            let wait = self.limiter.retry_after();
            warn!(wait_secs = wait.as_secs_f64(), "Rate limit exceeded, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::CircuitState;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::Instant;

    fn dispatcher(retry_attempts: u32) -> Dispatcher {
        let config = AgentConfig {
            retry_attempts,
            ..AgentConfig::new("test-api-key", "http://localhost:8000")
        };
        Dispatcher::new(&config)
    }

    fn server_error() -> TransportError {
        TransportError::Server {
            status: 503,
            body: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt_after_failures() {
        let d = dispatcher(2);
        let calls = AtomicU32::new(0);

        let result = d
            .execute(
                "events",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(server_error())
                        } else {
                            Ok(Response::Ack)
                        }
                    }
                },
                Response::is_success,
            )
            .await;

        assert_eq!(result, Some(Response::Ack));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(d.requests_sent(), 1);
        assert_eq!(d.requests_failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_exponentially_between_raised_errors() {
        let d = dispatcher(3);
        let start = Instant::now();

        let result = d
            .execute("events", || async { Err(server_error()) }, Response::is_success)
            .await;

        assert!(result.is_none());
        // 1s + 2s + 4s of backoff, none after the final attempt
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
        assert_eq!(d.requests_failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_retry_without_backoff() {
        let d = dispatcher(2);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = d
            .execute(
                "events",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Response::Rejected { status: 400 }) }
                },
                Response::is_success,
            )
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(d.requests_failed(), 3);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(d.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unstructured_reply_fails_structured_request() {
        let d = dispatcher(1);
        let result = d
            .execute("rules", || async { Ok(Response::Ack) }, Response::is_structured)
            .await;
        assert!(result.is_none());
        assert_eq!(d.requests_failed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_stops_invoking_operation() {
        let mut config = AgentConfig::new("test-api-key", "http://localhost:8000");
        config.retry_attempts = 3;
        config.reliability.failure_threshold = 1;
        let d = Dispatcher::new(&config);
        let calls = AtomicU32::new(0);

        let result = d
            .execute(
                "events",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(server_error()) }
                },
                Response::is_success,
            )
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn local_failures_are_not_retried() {
        let d = dispatcher(3);
        let calls = AtomicU32::new(0);
        let result = d
            .execute(
                "events",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(TransportError::Encryption(
                            crate::error::EncryptionError::Tampered,
                        ))
                    }
                },
                Response::is_success,
            )
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.requests_failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_rate_limit_without_spending_attempts() {
        let mut config = AgentConfig::new("test-api-key", "http://localhost:8000");
        config.retry_attempts = 0;
        config.reliability.rate_limit_calls = 1;
        config.reliability.rate_limit_window_secs = 10.0;
        let d = Dispatcher::new(&config);
        let start = Instant::now();

        for _ in 0..2 {
            let result = d
                .execute("status", || async { Ok(Response::Ack) }, Response::is_success)
                .await;
            assert_eq!(result, Some(Response::Ack));
        }
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
        assert_eq!(d.requests_sent(), 2);
    }
}
