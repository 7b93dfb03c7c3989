//! Single-shot GraphQL transport. No retries, no credential handling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use taskboard_shared::{GraphQlResponse, TransportError};
use url::Url;

use crate::config::ClientConfig;
use crate::operations::Operation;

/// One request as it leaves the client.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub operation: Operation,
    /// Full `Authorization` header value, if any.
    pub authorization: Option<String>,
}

impl OutgoingRequest {
    pub fn anonymous(operation: Operation) -> Self {
        Self {
            operation,
            authorization: None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutgoingRequest) -> Result<GraphQlResponse, TransportError>;
}

/// HTTP POST transport with a bounded wait per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.api_url.clone(), config.timeout)
    }

    async fn send_inner(&self, request: &OutgoingRequest) -> Result<GraphQlResponse, TransportError> {
        let body = serde_json::to_vec(&request.operation.to_request())
            .map_err(|e| TransportError::MalformedResponse(format!("encode request: {e}")))?;

        let mut rb = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(authorization) = &request.authorization {
            rb = rb.header("Authorization", authorization);
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| TransportError::NetworkUnavailable(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::NetworkUnavailable(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(TransportError::ServerError { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutgoingRequest) -> Result<GraphQlResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.send_inner(request)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    crate::log_debug!("{} failed: {}", request.operation.name, e);
                }
                result
            }
            Err(_) => {
                crate::log_debug!(
                    "{} timed out after {}ms",
                    request.operation.name,
                    self.timeout.as_millis()
                );
                Err(TransportError::NetworkUnavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}
