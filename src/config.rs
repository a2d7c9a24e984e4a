//! Agent configuration. Validated once; an invalid configuration never builds an agent.

use crate::error::ConfigError;
use crate::encryption::PayloadEncryptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_ENV: &str = "GUARD_AGENT_CONFIG";

const MIN_API_KEY_LEN: usize = 10;

/// Upper bound for every duration setting (seconds): one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector API key, sent as a bearer token
    pub api_key: String,
    /// Collector base URL
    pub endpoint: String,
    /// Project the telemetry belongs to. Also enables the dynamic rules loop.
    pub project_id: Option<String>,

    /// Capacity of each in-memory queue (events, metrics)
    pub buffer_size: usize,
    /// Flush interval (seconds)
    pub flush_interval_secs: u64,

    pub enable_metrics: bool,
    pub enable_events: bool,

    /// Retries after the first attempt
    pub retry_attempts: u32,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
    /// Base delay of the exponential backoff (seconds)
    pub backoff_factor: f64,

    /// Headers to redact from telemetry
    pub sensitive_headers: Vec<String>,
    /// Maximum payload size kept in events (bytes)
    pub max_payload_size: usize,

    /// URL-safe base64 AES-256 key. When set, batches are shipped encrypted.
    pub encryption_key: Option<String>,
    /// TTL of write-behind copies in the key-value store (seconds)
    pub persistence_ttl_secs: u64,

    pub reliability: ReliabilityConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Requests admitted per window
    pub rate_limit_calls: usize,
    pub rate_limit_window_secs: f64,
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    /// Backoff cap (seconds)
    pub max_backoff_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.fastapi-guard.com".to_string(),
            project_id: None,
            buffer_size: 100,
            flush_interval_secs: 30,
            enable_metrics: true,
            enable_events: true,
            retry_attempts: 3,
            timeout_secs: 30,
            backoff_factor: 1.0,
            sensitive_headers: vec![
                "authorization".to_string(),
                "cookie".to_string(),
                "x-api-key".to_string(),
            ],
            max_payload_size: 1024,
            encryption_key: None,
            persistence_ttl_secs: 3600,
            reliability: ReliabilityConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            rate_limit_calls: 100,
            rate_limit_window_secs: 60.0,
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
            max_backoff_secs: 60.0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl AgentConfig {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load the file named by `GUARD_AGENT_CONFIG` (default `guard-agent.json`) if it
    /// exists, then apply `GUARD_AGENT_API_KEY`, `GUARD_AGENT_ENDPOINT` and
    /// `GUARD_AGENT_PROJECT_ID`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("guard-agent.json"));
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        if let Ok(key) = std::env::var("GUARD_AGENT_API_KEY") {
            config.api_key = key;
        }
        if let Ok(endpoint) = std::env::var("GUARD_AGENT_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(project) = std::env::var("GUARD_AGENT_PROJECT_ID") {
            config.project_id = Some(project);
        }
        Ok(config)
    }

    /// Check every rule and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.api_key.len() < MIN_API_KEY_LEN {
            errors.push(format!(
                "api_key must be at least {MIN_API_KEY_LEN} characters long"
            ));
        }

        match reqwest::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => errors.push("endpoint must be a valid HTTP/HTTPS URL".to_string()),
        }

        if self.buffer_size == 0 {
            errors.push("buffer_size must be greater than 0".to_string());
        }
        if self.flush_interval_secs == 0 {
            errors.push("flush_interval must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            errors.push("timeout must be greater than 0".to_string());
        }
        check_secs(&mut errors, "backoff_factor", self.backoff_factor);
        if self.persistence_ttl_secs == 0 {
            errors.push("persistence_ttl must be greater than 0".to_string());
        } else if self.persistence_ttl_secs > MAX_DURATION_SECS {
            errors.push(format!(
                "persistence_ttl must be at most {MAX_DURATION_SECS} seconds"
            ));
        }

        let r = &self.reliability;
        if r.rate_limit_calls == 0 {
            errors.push("rate_limit_calls must be greater than 0".to_string());
        }
        check_secs(&mut errors, "rate_limit_window", r.rate_limit_window_secs);
        if r.failure_threshold == 0 {
            errors.push("failure_threshold must be greater than 0".to_string());
        }
        check_secs(&mut errors, "recovery_timeout", r.recovery_timeout_secs);
        check_secs(&mut errors, "max_backoff", r.max_backoff_secs);

        if let Some(key) = &self.encryption_key {
            if let Err(e) = PayloadEncryptor::new(key) {
                errors.push(format!("encryption_key is invalid: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn persistence_ttl(&self) -> Duration {
        Duration::from_secs(self.persistence_ttl_secs)
    }

    /// Project id used in batches when none is configured.
    pub fn batch_project_id(&self) -> &str {
        self.project_id.as_deref().unwrap_or("default")
    }
}

impl ReliabilityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        secs_to_duration(self.rate_limit_window_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        secs_to_duration(self.recovery_timeout_secs)
    }
}

/// Fractional seconds must be finite, positive and no longer than a year.
fn check_secs(errors: &mut Vec<String>, name: &str, secs: f64) {
    if !(secs > 0.0) {
        errors.push(format!("{name} must be greater than 0"));
    } else if !secs.is_finite() || secs > MAX_DURATION_SECS as f64 {
        errors.push(format!("{name} must be at most {MAX_DURATION_SECS} seconds"));
    }
}

/// Saturating conversion: negative or NaN is zero, overflow is `Duration::MAX`.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
