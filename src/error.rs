//! Error taxonomy. Only [`ConfigError`] ever reaches a caller of the agent; everything
//! below the agent boundary is absorbed into counters, log lines and status errors.

use thiserror::Error;

/// Invalid or unreadable configuration. Fatal at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid agent configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure of a single request to the collector.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Circuit breaker is OPEN")]
    CircuitOpen,

    #[error("Rate limited by server, retry after {retry_after}s")]
    RateLimited { retry_after: String },

    /// 401/403. Retried like any other transient failure.
    #[error("Authentication failed: {status}")]
    Authentication { status: u16 },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Invalid request header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("HTTP client is not initialized")]
    NotInitialized,
}

impl TransportError {
    /// Whether the retry loop should back off and try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::Serialization(_)
                | TransportError::Encryption(_)
                | TransportError::InvalidHeader(_)
        )
    }
}

/// Failure of the external key-value store. Never fatal for the buffer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Invalid project key: {0}")]
    InvalidKey(String),

    #[error("Failed to encrypt payload: {0}")]
    Encrypt(String),

    #[error("Invalid or tampered payload")]
    Tampered,
}

/// Errors surfaced by the agent lifecycle.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start transport: {0}")]
    Transport(#[from] TransportError),
}
