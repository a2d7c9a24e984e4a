//! Versioned policy snapshot served by the collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn default_ttl() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

/// Replaced wholesale on refresh; never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRules {
    pub rule_id: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds the snapshot stays fresh after it was fetched
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    #[serde(default)]
    pub ip_blacklist: Vec<String>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    /// Seconds
    #[serde(default)]
    pub ip_ban_duration: Option<u64>,

    #[serde(default)]
    pub blocked_countries: Vec<String>,
    #[serde(default)]
    pub whitelist_countries: Vec<String>,

    #[serde(default)]
    pub global_rate_limit: Option<u32>,
    /// Seconds
    #[serde(default)]
    pub global_rate_window: Option<u64>,
    /// endpoint -> (requests, window seconds)
    #[serde(default)]
    pub endpoint_rate_limits: HashMap<String, (u32, u64)>,

    #[serde(default)]
    pub blocked_cloud_providers: Vec<String>,
    #[serde(default)]
    pub blocked_user_agents: Vec<String>,
    #[serde(default)]
    pub suspicious_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_penetration_detection: bool,
    #[serde(default = "default_true")]
    pub enable_ip_banning: bool,
    #[serde(default = "default_true")]
    pub enable_rate_limiting: bool,

    #[serde(default)]
    pub emergency_mode: bool,
    #[serde(default)]
    pub emergency_whitelist: Vec<String>,
}

impl DynamicRules {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Whether the collector-declared expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_rules() -> DynamicRules {
        DynamicRules {
            rule_id: "rules-42".into(),
            version: 7,
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
            expires_at: Some("2024-05-02T12:00:00Z".parse().unwrap()),
            ttl: 600,
            ip_blacklist: vec!["203.0.113.9".into()],
            ip_whitelist: vec!["10.0.0.0/8".into()],
            ip_ban_duration: Some(3600),
            blocked_countries: vec!["XX".into()],
            whitelist_countries: vec!["DE".into()],
            global_rate_limit: Some(100),
            global_rate_window: Some(60),
            endpoint_rate_limits: HashMap::from([("/login".to_string(), (5, 60))]),
            blocked_cloud_providers: vec!["AWS".into()],
            blocked_user_agents: vec!["sqlmap".into()],
            suspicious_patterns: vec!["(?i)union select".into()],
            enable_penetration_detection: true,
            enable_ip_banning: false,
            enable_rate_limiting: true,
            emergency_mode: true,
            emergency_whitelist: vec!["198.51.100.1".into()],
        }
    }

    #[test]
    fn serialized_rules_parse_back_identically() {
        let rules = full_rules();
        let text = serde_json::to_string(&rules).unwrap();
        let parsed: DynamicRules = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, rules);
    }

    #[test]
    fn minimal_document_takes_defaults() {
        let rules: DynamicRules = serde_json::from_value(json!({
            "rule_id": "r1",
            "version": 1,
            "timestamp": "2024-05-01T12:00:00Z",
        }))
        .unwrap();
        assert_eq!(rules.ttl, 3600);
        assert_eq!(rules.ttl(), Duration::from_secs(3600));
        assert!(rules.enable_ip_banning);
        assert!(!rules.emergency_mode);
        assert!(rules.endpoint_rate_limits.is_empty());
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let result = serde_json::from_value::<DynamicRules>(json!({
            "rule_id": "r1",
            "version": "seven",
            "timestamp": "2024-05-01T12:00:00Z",
        }));
        assert!(result.is_err());

        let missing = serde_json::from_value::<DynamicRules>(json!({"status": "ok"}));
        assert!(missing.is_err());
    }

    #[test]
    fn expiry_is_inclusive() {
        let rules = full_rules();
        let at = rules.expires_at.unwrap();
        assert!(rules.is_expired(at));
        assert!(!rules.is_expired(at - chrono::Duration::seconds(1)));
    }
}
