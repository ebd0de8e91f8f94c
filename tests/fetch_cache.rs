//! Fetcher, cache and context tests against a scripted transport

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;
use tokio::sync::Notify;

use spectrum_ingest::{
    BodyStream, CancellationHandle, ContextConfig, DatasetContext, FetchError, FetchLimits,
    SecureFetcher, Transport, TransportError, TransportResponse,
};

const URL: &str = "https://example.org/spectra/lamp.csv";

#[derive(Clone)]
struct Reply {
    status: u16,
    content_type: Option<String>,
    content_length: Option<u64>,
    chunks: Vec<Vec<u8>>,
    /// Keep the body open after the last chunk.
    hang: bool,
}

impl Reply {
    fn ok(content_type: Option<&str>, chunks: &[&[u8]]) -> Self {
        Self {
            status: 200,
            content_type: content_type.map(str::to_string),
            content_length: None,
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            hang: false,
        }
    }

    fn csv(body: &str) -> Self {
        Self::ok(Some("text/csv"), &[body.as_bytes()])
    }
}

#[derive(Default)]
struct MockState {
    calls: AtomicUsize,
    replies: Mutex<HashMap<String, Reply>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

/// Transport answering from a per-URL script and counting calls.
#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    fn with(url: &str, reply: Reply) -> Self {
        let transport = Self::default();
        transport.route(url, reply);
        transport
    }

    fn route(&self, url: &str, reply: Reply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(url.to_string(), reply);
    }

    /// Hold every request until the returned gate is notified.
    fn gated(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self
            .state
            .replies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError(format!("no route to {url}")))?;

        let chunks = stream::iter(
            reply
                .chunks
                .into_iter()
                .map(|chunk| Ok::<_, TransportError>(Bytes::from(chunk))),
        );
        let body: BodyStream = if reply.hang {
            Box::pin(chunks.chain(stream::pending()))
        } else {
            Box::pin(chunks)
        };

        Ok(TransportResponse {
            status: reply.status,
            reason: (reply.status == 404).then(|| "Not Found".to_string()),
            content_length: reply.content_length,
            content_type: reply.content_type,
            body,
        })
    }
}

fn config() -> ContextConfig {
    let mut config = ContextConfig::new();
    config.sweep_interval(None);
    config
}

#[tokio::test]
async fn test_content_type_mismatch_not_cached() {
    let transport = MockTransport::with(URL, Reply::ok(Some("text/html"), &[b"<html></html>"]));
    let context = DatasetContext::init(transport.clone(), &config());

    let err = context.fetch_dataset(URL, "text/csv", "Lamp").await.unwrap_err();
    assert_eq!(
        err,
        FetchError::ContentTypeMismatch {
            content_type: "text/html".to_string()
        }
    );
    assert!(!context.cache().has(URL));
    assert_eq!(context.cache().stats().pending, 0);
    assert_eq!(context.fetcher().in_flight(), 0);

    // a retry issues a fresh request
    transport.route(URL, Reply::csv("x,y\n1,2\n"));
    let data = context.fetch_dataset(URL, "text/csv", "Lamp").await.unwrap();
    assert_eq!(data.x_values, vec![1.0]);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_fetch_dataset_parses_and_caches() {
    let transport = MockTransport::with(URL, Reply::csv("wavelength,intensity\n400,0.12\n410,0.15"));
    let context = DatasetContext::init(transport.clone(), &config());

    let data = context.fetch_dataset(URL, "text/csv", "").await.unwrap();
    assert_eq!(data.id, URL);
    assert_eq!(data.label, "lamp.csv");
    assert_eq!(data.x_label, "wavelength");
    assert_eq!(data.series[0].y_values, vec![0.12, 0.15]);

    let again = context.fetch_dataset(URL, "text/csv", "").await.unwrap();
    assert!(Arc::ptr_eq(&data, &again));
    assert_eq!(transport.calls(), 1);
    assert!(Arc::ptr_eq(&context.cache().get(URL).unwrap(), &data));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_call() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,10\n2,20\n"));
    let gate = transport.gated();
    let context = DatasetContext::init(transport.clone(), &config());

    let (first, second, ()) = tokio::join!(
        context.fetch_dataset(URL, "text/csv", "A"),
        context.fetch_dataset(URL, "text/csv", "A"),
        async {
            tokio::task::yield_now().await;
            assert_eq!(context.cache().stats().pending, 1);
            gate.notify_one();
        }
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.calls(), 1);
    assert_eq!(context.cache().stats().pending, 0);
}

#[tokio::test]
async fn test_concurrent_failures_share_outcome() {
    let mut reply = Reply::csv("");
    reply.status = 404;
    let transport = MockTransport::with(URL, reply);
    let gate = transport.gated();
    let context = DatasetContext::init(transport.clone(), &config());

    let (first, second, ()) = tokio::join!(
        context.fetch_dataset(URL, "text/csv", "A"),
        context.fetch_dataset(URL, "text/csv", "A"),
        async { gate.notify_one() }
    );

    let first = first.unwrap_err();
    assert_eq!(first.status(), Some(404));
    assert_eq!(Err::<(), _>(first), second.map(|_| ()));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_triggers_refetch() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let mut config = config();
    config.ttl(Duration::from_secs(60));
    let context = DatasetContext::init(transport.clone(), &config);

    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(context.cache().get(URL).is_none());
    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_removes_expired_entries() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let mut config = ContextConfig::new();
    config
        .ttl(Duration::from_secs(10))
        .sweep_interval(Some(Duration::from_secs(30)));
    let mut context = DatasetContext::init(transport, &config);
    assert!(context.is_sweeping());

    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert!(context.cache().has(URL));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!context.cache().has(URL));

    context.teardown();
    assert!(!context.is_sweeping());
}

#[tokio::test]
async fn test_streaming_size_limit_without_content_length() {
    let transport = MockTransport::with(
        URL,
        Reply::ok(Some("text/csv"), &[b"x,y\n", b"1,2\n", b"3,4\n"]),
    );
    let fetcher = SecureFetcher::with_limits(transport, FetchLimits { max_payload_bytes: 10 });

    let err = fetcher
        .fetch(URL, "text/csv", CancellationHandle::new())
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::SizeExceeded { limit: 10, observed: 12 });
    assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_content_length_checked_before_body() {
    let mut reply = Reply::ok(Some("text/csv"), &[]);
    reply.content_length = Some(6 * 1024 * 1024);
    reply.hang = true;
    let fetcher = SecureFetcher::new(MockTransport::with(URL, reply));

    let err = fetcher
        .fetch(URL, "text/csv", CancellationHandle::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::SizeExceeded {
            limit: 5 * 1024 * 1024,
            observed: 6 * 1024 * 1024
        }
    );
}

#[tokio::test]
async fn test_http_error_status() {
    let mut reply = Reply::csv("missing");
    reply.status = 404;
    let fetcher = SecureFetcher::new(MockTransport::with(URL, reply));

    let err = fetcher
        .fetch(URL, "text/csv", CancellationHandle::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Network error: HTTP 404: Not Found");
}

#[tokio::test]
async fn test_transport_failure_has_no_status() {
    let fetcher = SecureFetcher::new(MockTransport::default());

    let err = fetcher
        .fetch(URL, "text/csv", CancellationHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network { status: None, .. }));
}

#[tokio::test]
async fn test_validation_issues_no_call() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let context = DatasetContext::init(transport.clone(), &config());

    let err = context
        .fetch_dataset("ftp://example.org/a.csv", "text/csv", "A")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Validation(_)));

    let err = context
        .fetch_dataset(URL, "application/json", "A")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Validation(_)));

    assert_eq!(transport.calls(), 0);
    assert_eq!(context.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_parse_error_surfaces() {
    let transport = MockTransport::with(URL, Reply::csv("x\n1\n2\n"));
    let context = DatasetContext::init(transport, &config());

    let err = context.fetch_dataset(URL, "text/csv", "A").await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Parse(spectrum_ingest::ParseError::InsufficientColumns { found: 1 })
    );
    assert!(!context.cache().has(URL));
}

#[tokio::test]
async fn test_registry_cancel_reaches_every_caller() {
    let mut reply = Reply::ok(Some("text/csv"), &[b"x,y\n1,2\n"]);
    reply.hang = true;
    let transport = MockTransport::with(URL, reply);
    let context = DatasetContext::init(transport.clone(), &config());

    let (first, second, cancelled) = tokio::join!(
        context.fetch_dataset(URL, "text/csv", "A"),
        context.fetch_dataset(URL, "text/csv", "A"),
        async {
            tokio::task::yield_now().await;
            context.cancel(URL)
        }
    );

    assert!(cancelled);
    assert_eq!(first.unwrap_err(), FetchError::Cancelled);
    assert_eq!(second.unwrap_err(), FetchError::Cancelled);
    assert_eq!(transport.calls(), 1);
    assert_eq!(context.fetcher().in_flight(), 0);
    assert_eq!(context.cache().stats().pending, 0);
    assert!(!context.cache().has(URL));
    assert!(!context.cancel(URL));
}

#[tokio::test]
async fn test_starter_token_cancels_coalesced_callers() {
    let mut reply = Reply::ok(Some("text/csv"), &[b"x,y\n"]);
    reply.hang = true;
    let transport = MockTransport::with(URL, reply);
    let context = DatasetContext::init(transport, &config());
    let token = CancellationHandle::new();

    let (first, second, ()) = tokio::join!(
        context.fetch_dataset_with(URL, "text/csv", "A", token.clone()),
        context.fetch_dataset(URL, "text/csv", "A"),
        async {
            tokio::task::yield_now().await;
            token.cancel();
        }
    );

    assert!(first.unwrap_err().is_cancelled());
    assert!(second.unwrap_err().is_cancelled());
    assert_eq!(context.cache().stats().pending, 0);
    assert_eq!(context.fetcher().in_flight(), 0);
}

#[tokio::test]
async fn test_joined_caller_token_only_detaches_that_caller() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let gate = transport.gated();
    let context = DatasetContext::init(transport.clone(), &config());
    let token = CancellationHandle::new();

    let (first, second, ()) = tokio::join!(
        context.fetch_dataset(URL, "text/csv", "A"),
        context.fetch_dataset_with(URL, "text/csv", "A", token.clone()),
        async {
            tokio::task::yield_now().await;
            token.cancel();
            tokio::task::yield_now().await;
            gate.notify_one();
        }
    );

    assert_eq!(first.unwrap().x_values, vec![1.0]);
    assert_eq!(second.unwrap_err(), FetchError::Cancelled);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_already_cancelled_token_issues_no_call() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let fetcher = SecureFetcher::new(transport.clone());
    let token = CancellationHandle::new();
    token.cancel();

    let err = fetcher.fetch(URL, "text/csv", token).await.unwrap_err();
    assert_eq!(err, FetchError::Cancelled);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_delete_then_refetch() {
    let transport = MockTransport::with(URL, Reply::csv("x,y\n1,2\n"));
    let context = DatasetContext::init(transport.clone(), &config());

    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert!(context.cache().delete(URL));
    context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_multibyte_char_split_across_chunks() {
    // "ü" is C3 BC
    let transport = MockTransport::with(
        URL,
        Reply::ok(Some("text/csv"), &[b"x,\xC3", b"\xBC\n1,", b"2\n"]),
    );
    let fetcher = SecureFetcher::new(transport);

    let raw = fetcher
        .fetch(URL, "text/csv", CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(raw.text, "x,\u{fc}\n1,2\n");
}

#[tokio::test]
async fn test_bom_removed_and_server_mime_wins() {
    let transport = MockTransport::with(
        URL,
        Reply::ok(
            Some("text/tab-separated-values; charset=utf-8"),
            &[b"\xEF\xBB", b"\xBFx\ty\n1\t2\n"],
        ),
    );
    let context = DatasetContext::init(transport, &config());

    let data = context.fetch_dataset(URL, "text/csv", "A").await.unwrap();
    assert_eq!(data.mime_type, "text/tab-separated-values");
    assert_eq!(data.x_label, "x");
    assert_eq!(data.series[0].y_values, vec![2.0]);
}

#[tokio::test]
async fn test_declared_mime_used_without_server_type() {
    let transport = MockTransport::with(URL, Reply::ok(None, &[b"x,y\n1,2\n"]));
    let fetcher = SecureFetcher::new(transport);

    let raw = fetcher
        .fetch(URL, "Text/Plain; charset=utf-8", CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(raw.mime, "text/plain");
}

#[cfg(feature = "http")]
mod reqwest_transport {
    use super::*;
    use spectrum_ingest::ReqwestTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection with `response` written verbatim, returning its URL.
    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/spectra/lamp.csv")
    }

    fn fetcher(max_payload_bytes: u64) -> SecureFetcher<ReqwestTransport> {
        SecureFetcher::with_limits(
            ReqwestTransport::new().unwrap(),
            FetchLimits { max_payload_bytes },
        )
    }

    async fn fetch(url: &str, max_payload_bytes: u64) -> Result<Arc<spectrum_ingest::RawContent>, FetchError> {
        fetcher(max_payload_bytes)
            .fetch(url, "text/csv", CancellationHandle::new())
            .await
    }

    #[tokio::test]
    async fn test_status_and_reason_mapped() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let err = fetch(&url, 1024).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "Network error: HTTP 404: Not Found");
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: 1000\r\nConnection: close\r\n\r\nx,y\n",
        )
        .await;

        let err = fetch(&url, 16).await.unwrap_err();
        assert_eq!(err, FetchError::SizeExceeded { limit: 16, observed: 1000 });
    }

    #[tokio::test]
    async fn test_html_content_type_rejected() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 8\r\nConnection: close\r\n\r\nx,y\n1,2\n",
        )
        .await;

        let err = fetch(&url, 1024).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::ContentTypeMismatch {
                content_type: "text/html".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_non_ascii_content_type_rejected() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html; x=\xff\r\nContent-Length: 8\r\nConnection: close\r\n\r\nx,y\n1,2\n",
        )
        .await;

        let err = fetch(&url, 1024).await.unwrap_err();
        match err {
            FetchError::ContentTypeMismatch { content_type } => {
                assert!(content_type.starts_with("text/html"));
            }
            other => panic!("expected content type mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunked_body_without_length() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/csv; charset=utf-8\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n4\r\nx,y\n\r\n4\r\n1,2\n\r\n0\r\n\r\n",
        )
        .await;

        let raw = fetch(&url, 1024).await.unwrap();
        assert_eq!(raw.text, "x,y\n1,2\n");
        assert_eq!(raw.mime, "text/csv");
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n8\r\nx,y\n1,2\n\r\n8\r\n3,4\n5,6\n\r\n0\r\n\r\n",
        )
        .await;

        let err = fetch(&url, 12).await.unwrap_err();
        assert!(matches!(err, FetchError::SizeExceeded { limit: 12, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_has_no_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetch(&format!("http://{addr}/a.csv"), 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { status: None, .. }));
    }
}
