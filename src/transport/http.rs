//! reqwest-backed transport to the collector API.

use super::dispatch::Dispatcher;
use super::response::{self, Response};
use super::{Transport, TransportStats, EVENTS_PATH, METRICS_PATH, RULES_PATH, STATUS_PATH};
use crate::config::AgentConfig;
use crate::encryption::PayloadEncryptor;
use crate::error::TransportError;
use crate::models::{AgentStatus, DynamicRules, EventBatch, SecurityEvent, SecurityMetric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info};

const USER_AGENT: &str = concat!("guard-agent/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_MAX_IDLE_PER_HOST: usize = 5;

/// Body shipped instead of the plain batch when payload encryption is on.
#[derive(Serialize)]
struct EncryptedBatch<'a> {
    project_id: &'a str,
    batch_id: &'a str,
    created_at: DateTime<Utc>,
    encrypted: bool,
    payload: String,
}

pub struct HttpTransport {
    base_url: String,
    api_key: String,
    project_id: Option<String>,
    batch_project_id: String,
    timeout: Duration,
    client: RwLock<Option<Client>>,
    dispatcher: Dispatcher,
    encryptor: Option<PayloadEncryptor>,
    bytes_sent: AtomicU64,
}

impl HttpTransport {
    /// Fails only when a configured encryption key is unusable.
    pub fn new(config: &AgentConfig) -> Result<Self, TransportError> {
        let encryptor = config
            .encryption_key
            .as_deref()
            .map(PayloadEncryptor::new)
            .transpose()?;
        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
            batch_project_id: config.batch_project_id().to_string(),
            timeout: config.timeout(),
            client: RwLock::new(None),
            dispatcher: Dispatcher::new(config),
            encryptor,
            bytes_sent: AtomicU64::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_client(&self) -> Option<Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn build_client(&self) -> Result<Client, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        if let Some(project) = &self.project_id {
            headers.insert("x-project-id", HeaderValue::from_str(project)?);
        }

        Ok(Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(self.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()?)
    }

    /// The pooled client, built on first use if `initialize` was never called.
    async fn client(&self) -> Result<Client, TransportError> {
        if let Some(client) = self.current_client() {
            return Ok(client);
        }
        self.initialize().await?;
        self.current_client().ok_or(TransportError::NotInitialized)
    }

    async fn post(&self, path: &str, body: String) -> Result<Response, TransportError> {
        let client = self.client().await?;
        self.bytes_sent
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        let response = client.post(self.url(path)).body(body).send().await?;
        response::classify(response).await
    }

    async fn get(&self, path: &str) -> Result<Response, TransportError> {
        let client = self.client().await?;
        let response = client.get(self.url(path)).send().await?;
        response::classify(response).await
    }

    fn encode_batch(&self, batch: &EventBatch) -> Result<String, TransportError> {
        let Some(encryptor) = &self.encryptor else {
            return Ok(serde_json::to_string(batch)?);
        };
        let payload = encryptor.encrypt(batch, Some(batch.batch_id.as_str()))?;
        Ok(serde_json::to_string(&EncryptedBatch {
            project_id: &batch.project_id,
            batch_id: &batch.batch_id,
            created_at: batch.created_at,
            encrypted: true,
            payload,
        })?)
    }

    async fn ship(&self, kind: &str, path: &str, body: String) -> bool {
        self.dispatcher
            .execute(kind, || self.post(path, body.clone()), Response::is_success)
            .await
            .is_some()
    }

    async fn ship_batch(&self, kind: &str, path: &str, batch: EventBatch) -> bool {
        let body = match self.encode_batch(&batch) {
            Ok(body) => body,
            Err(e) => {
                error!(kind, batch_id = %batch.batch_id, error = %e, "Failed to encode batch");
                self.dispatcher.record_failure();
                return false;
            }
        };
        let shipped = self.ship(kind, path, body).await;
        if shipped {
            debug!(
                kind,
                batch_id = %batch.batch_id,
                events = batch.events.len(),
                metrics = batch.metrics.len(),
                "batch shipped"
            );
        }
        shipped
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        let mut slot = self.client.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        match self.build_client() {
            Ok(client) => {
                *slot = Some(client);
                info!(endpoint = %self.base_url, "HTTP transport initialized");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize HTTP transport");
                Err(e)
            }
        }
    }

    async fn close(&self) {
        let closed = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if closed.is_some() {
            info!("HTTP transport closed");
        }
    }

    async fn send_events(&self, events: Vec<SecurityEvent>) -> bool {
        if events.is_empty() {
            return true;
        }
        let batch = EventBatch::of_events(&self.batch_project_id, events);
        self.ship_batch("events", EVENTS_PATH, batch).await
    }

    async fn send_metrics(&self, metrics: Vec<SecurityMetric>) -> bool {
        if metrics.is_empty() {
            return true;
        }
        let batch = EventBatch::of_metrics(&self.batch_project_id, metrics);
        self.ship_batch("metrics", METRICS_PATH, batch).await
    }

    async fn fetch_dynamic_rules(&self) -> Option<DynamicRules> {
        let object = self
            .dispatcher
            .execute("rules", || self.get(RULES_PATH), Response::is_structured)
            .await?
            .into_object()?;
        match serde_json::from_value::<DynamicRules>(object.into()) {
            Ok(rules) => Some(rules),
            Err(e) => {
                error!(error = %e, "Failed to parse dynamic rules");
                None
            }
        }
    }

    async fn send_status(&self, status: &AgentStatus) -> bool {
        match serde_json::to_string(status) {
            Ok(body) => self.ship("status", STATUS_PATH, body).await,
            Err(e) => {
                error!(error = %e, "Failed to encode status");
                false
            }
        }
    }

    fn stats(&self) -> TransportStats {
        let breaker = self.dispatcher.breaker();
        TransportStats {
            requests_sent: self.dispatcher.requests_sent(),
            requests_failed: self.dispatcher.requests_failed(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            circuit_breaker_state: breaker.state(),
            failure_count: breaker.failure_count(),
            session_closed: self.current_client().is_none(),
        }
    }
}
