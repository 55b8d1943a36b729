//! HTTP client for the registry's registration surface.
//!
//! Registration and heartbeats retry with bounded exponential backoff on
//! timeouts and transport failures; everything else surfaces immediately.
//! Span reports are fire-and-forget.

use std::time::Duration;

use tracing::{debug, warn};

use mesh_core::error::{MeshError, Result};
use mesh_core::trace::Span;
use mesh_core::wire::{RegisterRequest, RegisterResponse};

/// Deadline for heartbeat and registration calls.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);
/// Retry attempts for retryable failures.
const MAX_ATTEMPTS: u32 = 5;
/// First backoff step; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Client side of the register/heartbeat protocol.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

fn map_send_error(err: reqwest::Error) -> MeshError {
    if err.is_timeout() {
        MeshError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        MeshError::transport(err.to_string())
    } else {
        MeshError::internal(err.to_string())
    }
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REGISTRATION_TIMEOUT)
            .build()
            .expect("default reqwest client");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /register` with retry.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.post_with_retry("/register", request).await
    }

    /// `POST /heartbeat` with retry.
    ///
    /// A 409 means the registry no longer knows this agent id; callers
    /// should re-register.
    pub async fn heartbeat(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.post_with_retry("/heartbeat", request).await
    }

    /// Report completed spans; failures are logged, never propagated.
    pub async fn report_spans(&self, spans: Vec<Span>) {
        if spans.is_empty() {
            return;
        }
        let url = format!("{}/trace", self.base_url);
        match self.http.post(&url).json(&spans).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "span report rejected");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "span report failed"),
        }
    }

    async fn post_with_retry(
        &self,
        path: &str,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = BACKOFF_BASE;
        let mut last_err = MeshError::internal("no attempts made");
        for attempt in 1..=MAX_ATTEMPTS {
            match self.post_once(&url, request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "registry call failed; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    async fn post_once(&self, url: &str, request: &RegisterRequest) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<RegisterResponse>()
                .await
                .map_err(|e| MeshError::validation(format!("invalid registry response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            400 => MeshError::validation(body),
            404 => MeshError::not_found("registry path", url),
            409 => MeshError::conflict(body),
            429 => MeshError::rate_limited(body),
            503 => MeshError::persistence(body),
            _ => MeshError::internal(format!("registry returned {}: {}", status, body)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = RegistryClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_transport_error() {
        // Nothing listens on this port.
        let client = RegistryClient::new("http://127.0.0.1:1");
        let request = RegisterRequest {
            agent: mesh_core::types::AgentInfo {
                id: None,
                name: "test".to_string(),
                version: "1.0.0".to_string(),
                description: None,
                endpoint: "http://localhost:9090".to_string(),
                namespace: "default".to_string(),
                agent_type: Default::default(),
            },
            sequence: 1,
            capabilities: vec![],
        };
        let err = client.post_once("http://127.0.0.1:1/register", &request).await;
        assert!(matches!(
            err.unwrap_err(),
            MeshError::Transport(_) | MeshError::Timeout(_)
        ));
    }
}
