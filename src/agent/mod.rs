//! Agent orchestrator: owns one buffer and one transport, runs the background loops and
//! exposes the send / flush / status surface used by the host application.

mod background;
pub mod global;

use crate::buffer::{BufferStats, EventBuffer};
use crate::config::AgentConfig;
use crate::error::{AgentError, ConfigError};
use crate::models::{AgentStatus, DynamicRules, HealthStatus, SecurityEvent, SecurityMetric};
use crate::privacy;
use crate::reliability::CircuitState;
use crate::storage::KeyValueStore;
use crate::transport::{HttpTransport, Transport, TransportStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffer fill ratio at which status reports `degraded`.
pub const DEGRADED_BUFFER_RATIO: f64 = 0.9;
/// Buffer fill ratio at which the health check fails.
pub const UNHEALTHY_BUFFER_RATIO: f64 = 0.95;
/// Failure rate above which status reports `degraded`.
pub const DEGRADED_FAILURE_RATE: f64 = 0.1;
/// Failure rate above which the health check fails.
pub const UNHEALTHY_FAILURE_RATE: f64 = 0.5;

pub const CIRCUIT_OPEN_MESSAGE: &str = "Transport circuit breaker is open";
pub const BUFFER_NEARLY_FULL_MESSAGE: &str = "Buffer nearly full";

#[derive(Default)]
struct Counters {
    events_sent: AtomicU64,
    metrics_sent: AtomicU64,
    events_failed: AtomicU64,
    metrics_failed: AtomicU64,
    rules_fetched: AtomicU64,
}

impl Counters {
    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    fn total_sent(&self) -> u64 {
        Self::get(&self.events_sent) + Self::get(&self.metrics_sent)
    }

    fn total_failed(&self) -> u64 {
        Self::get(&self.events_failed) + Self::get(&self.metrics_failed)
    }

    /// failed / (sent + failed); zero before anything was shipped.
    fn failure_rate(&self) -> f64 {
        let failed = self.total_failed();
        let attempts = self.total_sent() + failed;
        if attempts == 0 {
            0.0
        } else {
            failed as f64 / attempts as f64
        }
    }
}

struct CachedRules {
    rules: DynamicRules,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
}

struct Lifecycle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Aggregated counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub running: bool,
    pub uptime: f64,
    pub events_sent: u64,
    pub metrics_sent: u64,
    pub events_failed: u64,
    pub metrics_failed: u64,
    pub rules_fetched: u64,
    pub buffer_stats: BufferStats,
    pub transport_stats: TransportStats,
    pub cached_rules: bool,
    pub rules_last_update: Option<DateTime<Utc>>,
}

pub struct Agent {
    config: RwLock<Arc<AgentConfig>>,
    buffer: Arc<EventBuffer>,
    transport: Arc<dyn Transport>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<Option<Lifecycle>>,
    started_at: Instant,
    counters: Counters,
    rules: Mutex<Option<CachedRules>>,
}

impl Agent {
    /// Validate `config` and build an agent shipping over HTTP.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::build(config, Arc::new(transport)))
    }

    /// Validate `config` and build an agent over a caller-supplied transport.
    pub fn with_transport(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self::build(config, transport))
    }

    fn build(config: AgentConfig, transport: Arc<dyn Transport>) -> Self {
        let agent = Self {
            buffer: Arc::new(EventBuffer::new(&config)),
            config: RwLock::new(Arc::new(config)),
            transport,
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(None),
            started_at: Instant::now(),
            counters: Counters::default(),
            rules: Mutex::new(None),
        };
        info!("Guard agent initialized");
        agent
    }

    pub fn config(&self) -> Arc<AgentConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new configuration after validating it. Toggles take effect at once; the
    /// buffer and transport keep the settings they were built with.
    pub fn update_config(&self, config: AgentConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        debug!("agent configuration updated");
        Ok(())
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Attach a key-value store for write-behind durability of buffered items.
    pub async fn attach_store(&self, store: Arc<dyn KeyValueStore>) {
        self.buffer.attach_store(store).await;
        info!("key-value store attached");
    }

    /// Initialize the transport and launch the background loops. Warns and does nothing
    /// if already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            warn!("Agent is already running");
            return Ok(());
        }

        if let Err(e) = self.transport.initialize().await {
            error!(error = %e, "Failed to start agent");
            return Err(e.into());
        }
        self.buffer.start_auto_flush();
        self.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            tokio::spawn(Arc::clone(self).flush_loop(cancel.clone())),
            tokio::spawn(Arc::clone(self).status_loop(cancel.clone())),
        ];
        if self.config().project_id.is_some() {
            tasks.push(tokio::spawn(Arc::clone(self).rules_loop(cancel.clone())));
        }
        *lifecycle = Some(Lifecycle { cancel, tasks });

        info!("Guard agent started");
        Ok(())
    }

    /// Cancel and await the background loops, stop auto-flush, ship what is left and close
    /// the transport.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.running.store(false, Ordering::SeqCst);

        if let Some(Lifecycle { cancel, tasks }) = lifecycle.take() {
            cancel.cancel();
            for task in tasks {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        error!(error = %e, "background task panicked");
                    }
                }
            }
        }

        self.buffer.stop_auto_flush().await;
        self.flush_buffer().await;
        self.transport.close().await;
        info!("Guard agent stopped");
    }

    pub async fn close(&self) {
        self.stop().await;
    }

    /// Buffer an event unless events are disabled.
    pub async fn send_event(&self, event: SecurityEvent) {
        if !self.config().enable_events {
            return;
        }
        debug!(event_type = ?event.event_type, ip = %event.ip_address, "Event buffered");
        self.buffer.add_event(event).await;
    }

    /// Buffer a metric unless metrics are disabled.
    pub async fn send_metric(&self, metric: SecurityMetric) {
        if !self.config().enable_metrics {
            return;
        }
        debug!(metric_type = ?metric.metric_type, value = metric.value, "Metric buffered");
        self.buffer.add_metric(metric).await;
    }

    /// Drain both queues and ship each non-empty batch. Events and metrics succeed or fail
    /// independently.
    pub async fn flush_buffer(&self) {
        let events = self.buffer.flush_events().await;
        if !events.is_empty() {
            let count = events.len() as u64;
            if self.transport.send_events(events).await {
                self.counters.events_sent.fetch_add(count, Ordering::Relaxed);
                debug!(count, "Flushed events");
            } else {
                self.counters.events_failed.fetch_add(count, Ordering::Relaxed);
                error!(count, "Failed to send events");
            }
        }

        let metrics = self.buffer.flush_metrics().await;
        if !metrics.is_empty() {
            let count = metrics.len() as u64;
            if self.transport.send_metrics(metrics).await {
                self.counters.metrics_sent.fetch_add(count, Ordering::Relaxed);
                debug!(count, "Flushed metrics");
            } else {
                self.counters.metrics_failed.fetch_add(count, Ordering::Relaxed);
                error!(count, "Failed to send metrics");
            }
        }
    }

    /// Cached rules while younger than their TTL (and not past `expires_at`), otherwise a
    /// fresh fetch. A failed fetch falls back to the stale copy.
    pub async fn get_dynamic_rules(&self) -> Option<DynamicRules> {
        let stale = {
            let cached = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
            match cached.as_ref() {
                Some(c)
                    if c.fetched_at.elapsed() < c.rules.ttl()
                        && !c.rules.is_expired(Utc::now()) =>
                {
                    return Some(c.rules.clone())
                }
                Some(c) => Some(c.rules.clone()),
                None => None,
            }
        };

        match self.transport.fetch_dynamic_rules().await {
            Some(rules) => {
                *self.rules.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRules {
                    rules: rules.clone(),
                    fetched_at: Instant::now(),
                    fetched_at_utc: Utc::now(),
                });
                self.counters.rules_fetched.fetch_add(1, Ordering::Relaxed);
                debug!(rule_id = %rules.rule_id, version = rules.version, "Dynamic rules updated");
                Some(rules)
            }
            None => {
                warn!(cached = stale.is_some(), "Failed to fetch dynamic rules");
                stale
            }
        }
    }

    /// Health snapshot. Every triggered condition adds its message.
    pub fn get_status(&self) -> AgentStatus {
        let buffer_size = self.buffer.buffer_size();
        let mut errors = Vec::new();

        if self.transport.stats().circuit_breaker_state == CircuitState::Open {
            errors.push(CIRCUIT_OPEN_MESSAGE.to_string());
        }
        if self.buffer_fill(buffer_size) >= DEGRADED_BUFFER_RATIO {
            errors.push(BUFFER_NEARLY_FULL_MESSAGE.to_string());
        }
        let failure_rate = self.counters.failure_rate();
        if failure_rate > DEGRADED_FAILURE_RATE {
            errors.push(format!("High failure rate: {:.1}%", failure_rate * 100.0));
        }

        AgentStatus {
            timestamp: Utc::now(),
            status: if errors.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            uptime: self.started_at.elapsed().as_secs_f64(),
            events_sent: Counters::get(&self.counters.events_sent),
            events_failed: Counters::get(&self.counters.events_failed),
            buffer_size,
            last_flush: self.buffer.last_flush_time(),
            errors,
        }
    }

    /// Liveness gate, stricter than [`get_status`](Self::get_status).
    pub fn health_check(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if self.transport.stats().circuit_breaker_state == CircuitState::Open {
            return false;
        }
        if self.buffer_fill(self.buffer.buffer_size()) >= UNHEALTHY_BUFFER_RATIO {
            return false;
        }
        self.counters.failure_rate() <= UNHEALTHY_FAILURE_RATE
    }

    pub fn stats(&self) -> AgentStats {
        let rules_last_update = self
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.fetched_at_utc);
        AgentStats {
            running: self.is_running(),
            uptime: self.started_at.elapsed().as_secs_f64(),
            events_sent: Counters::get(&self.counters.events_sent),
            metrics_sent: Counters::get(&self.counters.metrics_sent),
            events_failed: Counters::get(&self.counters.events_failed),
            metrics_failed: Counters::get(&self.counters.metrics_failed),
            rules_fetched: Counters::get(&self.counters.rules_fetched),
            buffer_stats: self.buffer.stats(),
            transport_stats: self.transport.stats(),
            cached_rules: rules_last_update.is_some(),
            rules_last_update,
        }
    }

    /// Request headers with sensitive values redacted per configuration.
    pub fn sanitize_headers(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        privacy::sanitize_headers(headers, &self.config().sensitive_headers)
    }

    /// Payload cut to the configured maximum size.
    pub fn truncate_payload(&self, payload: &str) -> String {
        privacy::truncate_payload(payload, self.config().max_payload_size)
    }

    fn buffer_fill(&self, buffer_size: usize) -> f64 {
        buffer_size as f64 / self.buffer.capacity() as f64
    }
}
