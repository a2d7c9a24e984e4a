//! Integration test: HTTP transport against a mock collector.

use guard_agent::encryption::{generate_key, PayloadEncryptor};
use guard_agent::{
    AgentConfig, AgentStatus, CircuitState, EventType, HealthStatus, HttpTransport, MetricType,
    SecurityEvent, SecurityMetric, Transport,
};
use mockito::{Matcher, Server};
use serde_json::json;

fn config(endpoint: &str) -> AgentConfig {
    AgentConfig {
        project_id: Some("proj-1".into()),
        retry_attempts: 2,
        backoff_factor: 0.01,
        ..AgentConfig::new("test-api-key-123", endpoint)
    }
}

fn events(n: usize) -> Vec<SecurityEvent> {
    (0..n)
        .map(|i| {
            SecurityEvent::new(EventType::IpBanned, format!("10.0.0.{i}"), "block", "test")
                .with_request("GET", "/login", 403)
        })
        .collect()
}

#[tokio::test]
async fn ships_event_batch_with_auth_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .match_header("authorization", "Bearer test-api-key-123")
        .match_header("x-project-id", "proj-1")
        .match_header("content-type", "application/json")
        .match_header("user-agent", Matcher::Regex("^guard-agent/".into()))
        .match_body(Matcher::PartialJson(json!({
            "project_id": "proj-1",
            "compressed": false,
            "events": [{"ip_address": "10.0.0.0", "event_type": "ip_banned"}],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    transport.initialize().await.unwrap();
    assert!(transport.send_events(events(1)).await);

    mock.assert_async().await;
    let stats = transport.stats();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.requests_failed, 0);
    assert!(stats.bytes_sent > 0);
    assert!(!stats.session_closed);
}

#[tokio::test]
async fn created_counts_as_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/metrics")
        .match_body(Matcher::PartialJson(json!({"metrics": [{"metric_type": "request_count"}]})))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    let metrics = vec![SecurityMetric::new(MetricType::RequestCount, 42.0)];
    assert!(transport.send_metrics(metrics).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn client_error_is_retried_within_budget_then_fails() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .with_status(400)
        .with_body("bad batch")
        .expect(3)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(!transport.send_events(events(2)).await);

    mock.assert_async().await;
    let stats = transport.stats();
    assert_eq!(stats.requests_failed, 3);
    assert_eq!(stats.circuit_breaker_state, CircuitState::Closed);
}

#[tokio::test]
async fn empty_object_reply_counts_as_failed_attempt() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(3)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(!transport.send_events(events(1)).await);

    mock.assert_async().await;
    let stats = transport.stats();
    assert_eq!(stats.requests_sent, 0);
    assert_eq!(stats.requests_failed, 3);
    assert_eq!(stats.circuit_breaker_state, CircuitState::Closed);
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .with_status(503)
        .with_body("unavailable")
        .expect(3)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(!transport.send_events(events(1)).await);

    mock.assert_async().await;
    let stats = transport.stats();
    assert_eq!(stats.requests_sent, 0);
    assert_eq!(stats.requests_failed, 1);
    assert_eq!(stats.failure_count, 3);
}

#[tokio::test]
async fn auth_failures_and_throttling_are_retried() {
    let mut server = Server::new_async().await;
    let unauthorized = server
        .mock("POST", "/api/v1/events")
        .with_status(401)
        .expect(3)
        .create_async()
        .await;
    let throttled = server
        .mock("POST", "/api/v1/metrics")
        .with_status(429)
        .with_header("retry-after", "1")
        .expect(3)
        .create_async()
        .await;

    let mut c = config(&server.url());
    c.reliability.failure_threshold = 10;
    let transport = HttpTransport::new(&c).unwrap();
    assert!(!transport.send_events(events(1)).await);
    let metrics = vec![SecurityMetric::new(MetricType::ErrorRate, 0.5)];
    assert!(!transport.send_metrics(metrics).await);

    unauthorized.assert_async().await;
    throttled.assert_async().await;
}

#[tokio::test]
async fn breaker_opens_and_stops_calling_collector() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let mut c = config(&server.url());
    c.retry_attempts = 4;
    c.reliability.failure_threshold = 2;
    let transport = HttpTransport::new(&c).unwrap();
    assert!(!transport.send_events(events(1)).await);

    mock.assert_async().await;
    assert_eq!(transport.stats().circuit_breaker_state, CircuitState::Open);
}

#[tokio::test]
async fn fetches_and_parses_rules() {
    let mut server = Server::new_async().await;
    let body = json!({
        "rule_id": "rules-7",
        "version": 7,
        "timestamp": "2024-01-01T00:00:00Z",
        "ttl": 120,
        "ip_blacklist": ["192.168.1.100"],
        "blocked_countries": ["XX"],
        "endpoint_rate_limits": {"/login": [5, 60]},
        "emergency_mode": true,
    });
    let mock = server
        .mock("GET", "/api/v1/rules")
        .match_header("authorization", "Bearer test-api-key-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    let rules = transport.fetch_dynamic_rules().await.unwrap();

    mock.assert_async().await;
    assert_eq!(rules.rule_id, "rules-7");
    assert_eq!(rules.version, 7);
    assert_eq!(rules.ttl, 120);
    assert_eq!(rules.endpoint_rate_limits["/login"], (5, 60));
    assert!(rules.emergency_mode);
    assert!(rules.enable_rate_limiting);
}

#[tokio::test]
async fn malformed_rules_are_reported_absent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/rules")
        .with_status(200)
        .with_body(r#"{"rule_id": "r", "version": "not-a-number"}"#)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(transport.fetch_dynamic_rules().await.is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn unstructured_rules_reply_is_retried_then_absent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/rules")
        .with_status(200)
        .with_body("ok")
        .expect(3)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(transport.fetch_dynamic_rules().await.is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn status_is_posted_as_json() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/status")
        .match_body(Matcher::PartialJson(json!({
            "status": "degraded",
            "errors": ["Buffer nearly full"],
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    let status = AgentStatus {
        timestamp: chrono::Utc::now(),
        status: HealthStatus::Degraded,
        uptime: 12.5,
        events_sent: 3,
        events_failed: 0,
        buffer_size: 95,
        last_flush: None,
        errors: vec!["Buffer nearly full".into()],
    };
    assert!(transport.send_status(&status).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn encrypted_batches_ship_as_envelope() {
    let key = generate_key();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .match_body(Matcher::PartialJson(json!({
            "project_id": "proj-1",
            "encrypted": true,
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut c = config(&server.url());
    c.encryption_key = Some(key.clone());
    let transport = HttpTransport::new(&c).unwrap();
    assert!(transport.send_events(events(1)).await);
    mock.assert_async().await;
    assert!(PayloadEncryptor::new(&key).unwrap().verify_key());
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    assert!(transport.send_events(Vec::new()).await);
    assert!(transport.send_metrics(Vec::new()).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn closed_transport_reconnects_on_demand() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/events")
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(&server.url())).unwrap();
    transport.initialize().await.unwrap();
    transport.close().await;
    assert!(transport.stats().session_closed);

    assert!(transport.send_events(events(1)).await);
    assert!(!transport.stats().session_closed);
    mock.assert_async().await;
}
