use std::time::Duration;

use async_trait::async_trait;

/// A single request against an Esplora-style REST api. Paths are relative to
/// the endpoint base url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerRequest {
    Get(String),
    Post { path: String, body: String },
}

impl ExplorerRequest {
    pub fn path(&self) -> &str {
        match self {
            Self::Get(path) => path,
            Self::Post { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl TransportError {
    /// Timeouts, connection failures, 5xx and 429 move the call to the next
    /// endpoint. Any other HTTP status is an answer, not an outage.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited => true,
            Self::Http { status, .. } => *status >= 500,
        }
    }
}

#[async_trait]
pub trait ExplorerTransport: Send + Sync {
    async fn send(&self, request: &ExplorerRequest) -> Result<String, TransportError>;

    fn url(&self) -> &str;
}

/// Plain HTTP transport for one explorer endpoint.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Connection(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }
}

#[async_trait]
impl ExplorerTransport for HttpTransport {
    async fn send(&self, request: &ExplorerRequest) -> Result<String, TransportError> {
        let url = format!("{}{}", self.base_url, request.path());
        let builder = match request {
            ExplorerRequest::Get(_) => self.client.get(&url),
            ExplorerRequest::Post { body, .. } => self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(body.clone()),
        };

        let resp = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(Duration::ZERO)
            } else {
                TransportError::Connection(err.to_string())
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| TransportError::Connection(err.to_string()))?;

        if status.as_u16() == 429 {
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}
