//! Network collaborator.
//!
//! The core decides what to request; an [`HttpTransport`] performs the
//! exchange. Requests and responses use the `oauth2` crate's HTTP types so a
//! transport can be handed straight to the OAuth grant builders.

use async_trait::async_trait;
use oauth2::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use oauth2::{HttpRequest, HttpResponse};
use std::time::Duration;
use thiserror::Error;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Network-layer failure. Always eligible for a caller-level retry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Performs HTTP exchanges on behalf of the core.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // Token endpoints must not be followed across redirects.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to configure HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Other(format!("invalid method: {}", e)))?;

        tracing::debug!("{} {}", method, request.url);

        let mut builder = self
            .client
            .request(method, request.url.as_str())
            .body(request.body);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let response = builder.send().await.map_err(classify)?;

        let status_code = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| TransportError::Other(format!("invalid status: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }
}
