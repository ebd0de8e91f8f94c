use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::cancel::{CancellationHandle, either_cancelled};
use crate::encoding::Utf8StreamDecoder;
use crate::error::FetchError;
use crate::inflight::InFlight;
use crate::model::RawContent;
use crate::validate::{essence, is_allowed_mime, is_allowed_url};

/// Default maximum payload size (5 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Outcome shared by every caller of one coalesced fetch.
pub type FetchResult = Result<Arc<RawContent>, FetchError>;

/// Size limits applied to every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Largest accepted body, checked against `Content-Length` and the
    /// running total while streaming.
    pub max_payload_bytes: u64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Bounded, cancellable, coalescing fetcher for tabular text.
///
/// Concurrent fetches of the same URL share one transport request. Each
/// in-flight URL owns a [`CancellationHandle`] reachable through
/// [`cancel`](Self::cancel); its registration is dropped on every exit path.
pub struct SecureFetcher<T> {
    transport: Arc<T>,
    limits: FetchLimits,
    inflight: Arc<InFlight<FetchResult, CancellationHandle>>,
}

impl<T> Clone for SecureFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            limits: self.limits,
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<T: Transport> SecureFetcher<T> {
    /// Create a fetcher with default limits.
    pub fn new(transport: T) -> Self {
        Self::with_limits(transport, FetchLimits::default())
    }

    /// Create a fetcher with explicit limits.
    pub fn with_limits(transport: T, limits: FetchLimits) -> Self {
        Self {
            transport: Arc::new(transport),
            limits,
            inflight: Arc::new(InFlight::default()),
        }
    }

    /// Returns the configured limits.
    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    /// Number of URLs currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Cancel the in-flight fetch for `url`. Returns false if none is running.
    ///
    /// Every caller attached to that fetch receives [`FetchError::Cancelled`].
    pub fn cancel(&self, url: &str) -> bool {
        match self.inflight.extra(url) {
            Some(handle) => {
                info!(url, "cancelling fetch");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Fetch `url` and decode it as UTF-8 text.
    ///
    /// The URL and declared MIME type are validated before any network call.
    /// If the same URL is already in flight the caller attaches to it. When
    /// `cancel` fires on the caller that started the fetch, the stream is
    /// aborted for everyone; an attached caller's handle only detaches that
    /// caller.
    pub async fn fetch(
        &self,
        url: &str,
        declared_mime: &str,
        cancel: CancellationHandle,
    ) -> FetchResult {
        if !is_allowed_url(url) {
            return Err(FetchError::Validation(format!(
                "URL must be absolute http:// or https://: {url}"
            )));
        }
        if !is_allowed_mime(declared_mime) {
            return Err(FetchError::Validation(format!(
                "Unsupported MIME type: {declared_mime}"
            )));
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let (request, started) = self.inflight.join_or_register(url, || {
            let registry_handle = CancellationHandle::new();
            let future = download(
                Arc::clone(&self.transport),
                url.to_string(),
                declared_mime.to_string(),
                self.limits,
                cancel.clone(),
                registry_handle.clone(),
            );
            (future, registry_handle)
        });
        if !started {
            debug!(url, "joining in-flight fetch");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result,
        }
    }
}

/// Run one fetch until it completes or either handle is cancelled.
async fn download<T: Transport>(
    transport: Arc<T>,
    url: String,
    declared_mime: String,
    limits: FetchLimits,
    caller: CancellationHandle,
    registry: CancellationHandle,
) -> FetchResult {
    tokio::select! {
        biased;
        _ = either_cancelled(&caller, &registry) => {
            info!(url = %url, "fetch cancelled");
            Err(FetchError::Cancelled)
        }
        result = stream_body(transport.as_ref(), &url, &declared_mime, limits) => {
            result.map(Arc::new)
        }
    }
}

async fn stream_body<T: Transport>(
    transport: &T,
    url: &str,
    declared_mime: &str,
    limits: FetchLimits,
) -> Result<RawContent, FetchError> {
    info!(url, "fetching dataset");
    let response = transport.get(url).await?;

    if !response.is_success() {
        warn!(url, status = response.status, "non-success status");
        return Err(FetchError::Network {
            status: Some(response.status),
            message: response
                .reason
                .clone()
                .unwrap_or_else(|| "request failed".to_string()),
        });
    }

    let limit = limits.max_payload_bytes;
    if let Some(declared) = response.content_length
        && declared > limit
    {
        warn!(url, declared, limit, "content-length exceeds limit");
        return Err(FetchError::SizeExceeded {
            limit,
            observed: declared,
        });
    }

    // The server's content type, when present, takes precedence.
    let effective_mime = match response.content_type.as_deref().map(str::trim) {
        Some(server) if !server.is_empty() => {
            if !is_allowed_mime(server) {
                warn!(url, content_type = server, "content type rejected");
                return Err(FetchError::ContentTypeMismatch {
                    content_type: server.to_string(),
                });
            }
            essence(server)
        }
        _ => essence(declared_mime),
    };

    let mut body = response.body;
    let mut decoder = Utf8StreamDecoder::new();
    let mut received: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if received > limit {
            warn!(url, received, limit, "payload exceeded limit while streaming");
            return Err(FetchError::SizeExceeded {
                limit,
                observed: received,
            });
        }
        decoder.push(&chunk);
    }

    if decoder.had_replacements() {
        warn!(url, "payload contained invalid UTF-8; replaced with U+FFFD");
    }
    let text = decoder.finish();
    info!(url, bytes = received, mime = %effective_mime, "fetched dataset");

    Ok(RawContent::new(text, effective_mime))
}
