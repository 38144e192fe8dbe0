//! Transport capability used by the orchestrator
//!
//! The engine never performs network I/O itself; it hands a finished
//! document to a [`Transport`] and receives the raw reply. Retry and
//! backoff belong to the transport or to whoever schedules check cycles.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError, UpdateError};
use crate::models::UpdateRequestDocument;

/// Delivers one outbound document and returns the server's reply body
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &Url,
        document: &UpdateRequestDocument,
    ) -> std::result::Result<Vec<u8>, TransportError>;
}

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("update-engine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Posts documents as HTTP request bodies
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| UpdateError::config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpTransportConfig::default())
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Url,
        document: &UpdateRequestDocument,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        debug!("HTTP POST {} ({} bytes)", endpoint, document.body.len());

        let response = self
            .client
            .post(endpoint.clone())
            .header(header::CONTENT_TYPE, document.content_type)
            .body(document.body.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(classify)?;
        Ok(body.to_vec())
    }
}
