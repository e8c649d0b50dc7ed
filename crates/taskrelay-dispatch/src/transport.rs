//! Transport seam between the delivery client and the sink.

use std::time::Duration;

use async_trait::async_trait;

/// A fully-built outbound request: serialized JSON body plus headers.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
}

/// Sends one request and reports the HTTP status it completed with.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<u16, TransportError>;

    /// Where requests go, for log lines.
    fn endpoint(&self) -> &str;
}

/// POSTs to the configured sink URL with reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<u16, TransportError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(request.body.clone());

        for (key, value) in &request.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        match req.send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
