//! # Remote Transport
//!
//! The network seam of the invoker. [`HttpTransport`] is the reqwest-backed
//! implementation; tests substitute their own.

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::handler_registry::ActionPayload;
use crate::error::{InvocationError, SagaError, SagaResult};

/// A single call against a remote service
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: Url,
    pub body: ActionPayload,
}

/// A successful (2xx) remote response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteResponse {
    pub status_code: u16,
    pub body: ActionPayload,
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Perform the call; any non-2xx status is a [`InvocationError::RemoteFailure`]
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, InvocationError>;

    /// GET `url` and report the status code
    async fn probe(&self, url: Url) -> Result<u16, InvocationError>;
}

/// reqwest-backed transport with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> SagaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("saga-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                SagaError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, timeout })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> InvocationError {
        if error.is_timeout() {
            InvocationError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            }
        } else {
            InvocationError::RemoteFailure {
                status_code: error.status().map(|status| status.as_u16()),
                message: error.to_string(),
            }
        }
    }
}

/// Response bodies that are not JSON objects are wrapped under `response`
fn body_to_payload(bytes: &[u8]) -> ActionPayload {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return ActionPayload::new();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(other) => ActionPayload::from([("response".to_string(), other)]),
        Err(_) => ActionPayload::from([(
            "response".to_string(),
            Value::String(String::from_utf8_lossy(bytes).into_owned()),
        )]),
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, InvocationError> {
        debug!(method = %request.method, url = %request.url, "Sending remote invocation");

        let response = self
            .client
            .request(request.method, request.url)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(InvocationError::RemoteFailure {
                status_code: Some(status.as_u16()),
                message: format!(
                    "{status}: {}",
                    String::from_utf8_lossy(&bytes).chars().take(512).collect::<String>()
                ),
            });
        }

        Ok(RemoteResponse {
            status_code: status.as_u16(),
            body: body_to_payload(&bytes),
        })
    }

    async fn probe(&self, url: Url) -> Result<u16, InvocationError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Ok(response.status().as_u16())
    }
}
