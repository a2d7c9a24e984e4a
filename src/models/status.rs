use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

/// Point-in-time health snapshot. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    /// Seconds since the agent was constructed
    pub uptime: f64,
    pub events_sent: u64,
    pub events_failed: u64,
    pub buffer_size: usize,
    pub last_flush: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors: Vec<String>,
}
