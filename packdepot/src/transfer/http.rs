//! HTTP transport abstraction for testability.
//!
//! The transfer engine only needs a status code, an optional content length
//! and a byte stream. [`HttpTransport`] captures exactly that so tests can
//! script responses without a server.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as a stream of chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response headers within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The body stream failed midway.
    #[error("read failed: {0}")]
    Read(String),
}

/// An HTTP response whose body has not been consumed yet.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length` of this response, if announced.
    pub content_length: Option<u64>,
    /// Response body.
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Trait for issuing GET requests.
pub trait HttpTransport: Send + Sync {
    /// Issue a GET for `url`.
    ///
    /// When `range_start` is set the request carries
    /// `Range: bytes=<range_start>-`.
    fn get<'a>(
        &'a self,
        url: &'a str,
        range_start: Option<u64>,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}

/// Format the `Range` header value for an open-ended resume.
pub fn range_header(start: u64) -> String {
    format!("bytes={}-", start)
}

/// Real transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the given header timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        range_start: Option<u64>,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(start) = range_start {
                request = request.header(reqwest::header::RANGE, range_header(start));
            }

            // Only the wait for headers is bounded; the body may stream for
            // as long as the pack needs.
            let response = tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| TransportError::Timeout(self.timeout))?
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout(self.timeout)
                    } else {
                        TransportError::Connect(e.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            let content_length = response.content_length();
            let body = response
                .bytes_stream()
                .map(|item| item.map_err(|e| TransportError::Read(e.to_string())));

            Ok(TransportResponse {
                status,
                content_length,
                body: Box::pin(body),
            })
        })
    }
}
