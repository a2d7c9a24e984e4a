//! Guard Agent buffers security events and metrics from a host application and ships
//! them to a remote collector.
//!
//! Modular structure:
//! - [`agent`]: Orchestrator, background loops, process-wide accessor
//! - [`buffer`]: Bounded event/metric queues with write-behind persistence
//! - [`transport`]: HTTP shipping with retry, rate limiting and circuit breaking
//! - [`reliability`]: Rate limiter, circuit breaker, backoff
//! - [`storage`]: Key-value store contract and implementations
//! - [`encryption`]: AES-256-GCM payload encryption
//! - [`privacy`]: Header redaction, payload truncation, IP hashing
//! - [`logging`]: Structured JSON logging

pub mod agent;
pub mod buffer;
pub mod config;
pub mod encryption;
pub mod error;
pub mod logging;
pub mod models;
pub mod privacy;
pub mod reliability;
pub mod storage;
pub mod transport;

pub use agent::{Agent, AgentStats};
pub use buffer::{BufferStats, EventBuffer};
pub use config::{AgentConfig, LogConfig, ReliabilityConfig};
pub use encryption::PayloadEncryptor;
pub use error::{AgentError, ConfigError, EncryptionError, StoreError, TransportError};
pub use logging::StructuredLogger;
pub use models::{
    AgentStatus, DynamicRules, EventBatch, EventType, HealthStatus, MetricType, SecurityEvent,
    SecurityMetric,
};
pub use reliability::{CircuitBreaker, CircuitState, RateLimiter};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use transport::{HttpTransport, Transport, TransportStats};
