//! Telemetry records shipped to the collector.

mod rules;
mod status;

pub use rules::DynamicRules;
pub use status::{AgentStatus, HealthStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IpBanned,
    RateLimited,
    SuspiciousRequest,
    CloudBlocked,
    CountryBlocked,
    PenetrationAttempt,
    BehavioralViolation,
    UserAgentBlocked,
    CustomRuleTriggered,
}

/// A security decision taken by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub action_taken: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    /// Rule that produced the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Pattern that matched the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SecurityEvent {
    pub fn new(
        event_type: EventType,
        ip_address: impl Into<String>,
        action_taken: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            ip_address: ip_address.into(),
            country: None,
            user_agent: None,
            action_taken: action_taken.into(),
            reason: reason.into(),
            endpoint: None,
            method: None,
            status_code: None,
            response_time: None,
            rule_id: None,
            pattern: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_request(
        mut self,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status_code: u16,
    ) -> Self {
        self.method = Some(method.into());
        self.endpoint = Some(endpoint.into());
        self.status_code = Some(status_code);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    RequestCount,
    ResponseTime,
    ErrorRate,
    BandwidthUsage,
    ThreatLevel,
    BlockRate,
    CacheHitRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetric {
    pub timestamp: DateTime<Utc>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SecurityMetric {
    pub fn new(metric_type: MetricType, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            metric_type,
            value,
            endpoint: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Events and metrics bundled for one request. Built right before serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub project_id: String,
    #[serde(default)]
    pub events: Vec<SecurityEvent>,
    #[serde(default)]
    pub metrics: Vec<SecurityMetric>,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub compressed: bool,
}

impl EventBatch {
    pub fn of_events(project_id: impl Into<String>, events: Vec<SecurityEvent>) -> Self {
        Self::build(project_id.into(), events, Vec::new())
    }

    pub fn of_metrics(project_id: impl Into<String>, metrics: Vec<SecurityMetric>) -> Self {
        Self::build(project_id.into(), Vec::new(), metrics)
    }

    fn build(project_id: String, events: Vec<SecurityEvent>, metrics: Vec<SecurityMetric>) -> Self {
        Self {
            project_id,
            events,
            metrics,
            batch_id: generate_batch_id(),
            created_at: Utc::now(),
            compressed: false,
        }
    }
}

/// `<unix millis>-<8 hex chars>`.
pub fn generate_batch_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &random[..8])
}
