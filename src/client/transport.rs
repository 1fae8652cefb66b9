//! HTTP Transport
//!
//! The network seam of the client. `HttpTransport` talks to the gateway with
//! reqwest; tests substitute their own `Transport`.

use crate::config::RequestConfig;
use crate::error::{ChatError, Result};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::pin::Pin;
use std::time::Duration;

/// Response body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Status and body of a completed request
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: ByteStream) -> Self {
        Self { status, body }
    }

    /// Response with the whole body available up front
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(status, Box::pin(futures::stream::once(async move { Ok(body) })))
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Collect the body into a string
    pub async fn text(mut self) -> Result<String> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        String::from_utf8(buf)
            .map_err(|e| ChatError::Response(format!("Response body is not UTF-8: {}", e)))
    }
}

/// Issues requests to the gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<TransportResponse>;

    /// Plain GET
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the default timeouts
    pub fn new() -> Result<Self> {
        Self::with_config(&RequestConfig::default())
    }

    pub fn with_config(config: &RequestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn into_response(response: reqwest::Response) -> TransportResponse {
        let status = response.status();
        let mut byte_stream = response.bytes_stream();
        let body = stream! {
            while let Some(chunk) = byte_stream.next().await {
                yield chunk.map_err(ChatError::from);
            }
        };
        TransportResponse::new(status, Box::pin(body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await?;

        Ok(Self::into_response(response))
    }

    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await?;

        Ok(Self::into_response(response))
    }
}
