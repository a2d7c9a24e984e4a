//! Mapping of collector HTTP responses onto success, rejection or a retryable error.

use crate::error::TransportError;
use reqwest::header::RETRY_AFTER;
use serde_json::{Map, Value};
use tracing::{debug, error};

const DEFAULT_RETRY_AFTER: &str = "60";

/// Outcome of a request the collector answered without a retryable failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// 200 with a JSON object body. An empty object is not accepted.
    Json(Map<String, Value>),
    /// 200 with any other body, or 201
    Ack,
    /// Any other 4xx. Not raised, so the breaker sees it as a success.
    Rejected { status: u16 },
}

impl Response {
    pub fn is_success(&self) -> bool {
        match self {
            Response::Json(map) => !map.is_empty(),
            Response::Ack => true,
            Response::Rejected { .. } => false,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Response::Json(map) if !map.is_empty())
    }

    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            Response::Json(map) => Some(map),
            _ => None,
        }
    }
}

pub(crate) async fn classify(response: reqwest::Response) -> Result<Response, TransportError> {
    let status = response.status().as_u16();
    debug!(status, url = %response.url(), "collector response");
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await?;
    interpret(status, retry_after.as_deref(), body)
}

pub(crate) fn interpret(
    status: u16,
    retry_after: Option<&str>,
    body: String,
) -> Result<Response, TransportError> {
    match status {
        200 => match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(Response::Json(map)),
            _ => Ok(Response::Ack),
        },
        201 => Ok(Response::Ack),
        429 => Err(TransportError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER).to_string(),
        }),
        401 | 403 => Err(TransportError::Authentication { status }),
        s if s >= 500 => Err(TransportError::Server { status, body }),
        _ => {
            error!(status, body = %body, "Client error");
            Ok(Response::Rejected { status })
        }
    }
}
