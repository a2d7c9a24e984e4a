//! Subscriber setup: one JSON object per line (ndjson) for ingestion, or plain text.

use crate::config::LogConfig;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Installs the process-wide tracing subscriber. The library never calls this itself.
pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber. Level comes from `RUST_LOG`, else `config.level`.
    /// Panics if a global subscriber is already set; see [`try_init`](Self::try_init).
    pub fn init(config: &LogConfig) {
        if let Err(e) = Self::try_init(config) {
            panic!("failed to install tracing subscriber: {e}");
        }
    }

    pub fn try_init(config: &LogConfig) -> Result<(), TryInitError> {
        let filter = Self::filter(&config.level);
        if config.json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stdout);
            tracing_subscriber::registry().with(filter).with(fmt).try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                .try_init()
        }
    }

    fn filter(default_level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    }
}
