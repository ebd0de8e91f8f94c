use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::TransportError;

/// Response body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Status line, selected headers and streaming body of a GET response.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase for the status, if known.
    pub reason: Option<String>,
    /// Value of `Content-Length`, if present and numeric.
    pub content_length: Option<u64>,
    /// Raw value of `Content-Type`, if present.
    pub content_type: Option<String>,
    /// Body chunks in arrival order.
    pub body: BodyStream,
}

impl TransportResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal asynchronous HTTP GET abstraction.
///
/// The fetcher only needs a status, two headers and a chunk stream, so
/// implementations stay small and tests can script responses without a
/// network.
///
/// # Implementations
///
/// - [`ReqwestTransport`]: production implementation using `reqwest` (feature `http`)
/// - Scripted implementations for testing
pub trait Transport: Send + Sync + 'static {
    /// Issue a GET request for `url` without credentials.
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// transport-level failures (DNS, connect, TLS) are errors.
    fn get(&self, url: &str) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[cfg(feature = "http")]
mod reqwest_impl {
    use super::*;
    use futures_util::StreamExt;
    use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

    impl From<reqwest::Error> for TransportError {
        fn from(err: reqwest::Error) -> Self {
            TransportError(err.to_string())
        }
    }

    /// Production transport backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Create a transport with a default client.
        pub fn new() -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
                .build()?;
            Ok(Self { client })
        }

        /// Wrap an existing client.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
            let response = self.client.get(url).send().await?;

            let status = response.status();
            let headers = response.headers();
            let content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            // A header that is not visible ASCII still counts as present.
            let content_type = headers
                .get(CONTENT_TYPE)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from));

            Ok(TransportResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().map(str::to_string),
                content_length,
                content_type,
                body: Box::pin(body),
            })
        }
    }
}

#[cfg(feature = "http")]
pub use reqwest_impl::ReqwestTransport;
