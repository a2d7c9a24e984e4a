//! Integration test: global subscriber installation.

use guard_agent::{LogConfig, StructuredLogger};

#[test]
fn subscriber_installs_once() {
    let config = LogConfig {
        level: "debug".into(),
        json: true,
    };
    assert!(StructuredLogger::try_init(&config).is_ok());
    tracing::info!(component = "test", "structured logging ready");

    let plain = LogConfig {
        level: "info".into(),
        json: false,
    };
    assert!(StructuredLogger::try_init(&plain).is_err());
}
