//! Shipping batches to the collector and fetching dynamic rules from it.

mod dispatch;
mod http;
mod response;

pub use http::HttpTransport;
pub use response::Response;

use crate::error::TransportError;
use crate::models::{AgentStatus, DynamicRules, SecurityEvent, SecurityMetric};
use crate::reliability::CircuitState;
use async_trait::async_trait;
use serde::Serialize;

pub const EVENTS_PATH: &str = "/api/v1/events";
pub const METRICS_PATH: &str = "/api/v1/metrics";
pub const RULES_PATH: &str = "/api/v1/rules";
pub const STATUS_PATH: &str = "/api/v1/status";

/// Counters reported by a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub requests_failed: u64,
    pub bytes_sent: u64,
    pub circuit_breaker_state: CircuitState,
    pub failure_count: u32,
    pub session_closed: bool,
}

/// Collector connection used by the agent. Send operations never fail loudly: they
/// return `false` once their retry budget is spent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Build the connection pool. Idempotent.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Release pooled connections.
    async fn close(&self);

    /// `true` for an empty list without touching the network.
    async fn send_events(&self, events: Vec<SecurityEvent>) -> bool;

    /// `true` for an empty list without touching the network.
    async fn send_metrics(&self, metrics: Vec<SecurityMetric>) -> bool;

    /// `None` when the fetch fails or the reply is not a valid rules snapshot.
    async fn fetch_dynamic_rules(&self) -> Option<DynamicRules>;

    async fn send_status(&self, status: &AgentStatus) -> bool;

    fn stats(&self) -> TransportStats;
}
