//! Session object wiring the cache, fetcher and parser together.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{DEFAULT_TTL, DatasetCache, DatasetResult};
use crate::cancel::CancellationHandle;
use crate::error::FetchError;
use crate::fetch::{FetchLimits, SecureFetcher, Transport};
use crate::parser::{DEFAULT_MAX_POINTS, TabularParser};

/// Default interval between sweeps of expired cache entries (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Settings for a [`DatasetContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Lifetime of cached datasets.
    pub ttl: Duration,
    /// Period of the background sweep. `None` disables it.
    pub sweep_interval: Option<Duration>,
    /// Payload limits for the fetcher.
    pub limits: FetchLimits,
    /// Maximum points per series.
    pub max_points: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            limits: FetchLimits::default(),
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl ContextConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifetime of cached datasets.
    pub fn ttl(&mut self, ttl: Duration) -> &mut Self {
        self.ttl = ttl;
        self
    }

    /// Set the sweep period, or `None` to disable the sweep task.
    pub fn sweep_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the largest accepted payload in bytes.
    pub fn max_payload_bytes(&mut self, bytes: u64) -> &mut Self {
        self.limits.max_payload_bytes = bytes;
        self
    }

    /// Set the maximum points per series. `0` disables downsampling.
    pub fn max_points(&mut self, max_points: usize) -> &mut Self {
        self.max_points = max_points;
        self
    }
}

/// Owns the dataset cache, the fetcher and the parser for one session.
///
/// Repeated and concurrent requests for the same URL are served from the
/// cache or attached to the request already in flight, so each URL is
/// fetched and parsed at most once per TTL window.
///
/// # Example
///
/// ```no_run
/// use spectrum_ingest::{ContextConfig, DatasetContext, ReqwestTransport};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut context = DatasetContext::init(ReqwestTransport::new()?, &ContextConfig::default());
/// let spectrum = context
///     .fetch_dataset("https://example.org/lamp.csv", "text/csv", "Lamp")
///     .await?;
/// println!("{} points", spectrum.len());
/// context.teardown();
/// # Ok(())
/// # }
/// ```
pub struct DatasetContext<T> {
    cache: Arc<DatasetCache>,
    fetcher: SecureFetcher<T>,
    parser: TabularParser,
    sweeper: Option<JoinHandle<()>>,
}

impl<T: Transport> DatasetContext<T> {
    /// Build a context and start the periodic sweep.
    ///
    /// The sweep only starts when called inside a tokio runtime and
    /// `sweep_interval` is a non-zero duration.
    pub fn init(transport: T, config: &ContextConfig) -> Self {
        let cache = Arc::new(DatasetCache::with_ttl(config.ttl));
        let mut parser = TabularParser::new();
        parser.max_points(config.max_points);

        let sweeper = config
            .sweep_interval
            .filter(|every| !every.is_zero())
            .and_then(|every| spawn_sweeper(Arc::downgrade(&cache), every));

        Self {
            cache,
            fetcher: SecureFetcher::with_limits(transport, config.limits),
            parser,
            sweeper,
        }
    }

    /// The dataset cache, for explicit `get`, `set`, `delete` and `clear`.
    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &SecureFetcher<T> {
        &self.fetcher
    }

    /// Whether the background sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Fetch, parse and cache the dataset at `url`.
    ///
    /// An empty `label` is replaced by the last path segment of the URL.
    pub async fn fetch_dataset(&self, url: &str, mime: &str, label: &str) -> DatasetResult {
        self.fetch_dataset_with(url, mime, label, CancellationHandle::new())
            .await
    }

    /// Like [`fetch_dataset`](Self::fetch_dataset) with a caller-supplied
    /// cancellation handle.
    pub async fn fetch_dataset_with(
        &self,
        url: &str,
        mime: &str,
        label: &str,
        cancel: CancellationHandle,
    ) -> DatasetResult {
        if let Some(data) = self.cache.get(url) {
            debug!(url, "cache hit");
            return Ok(data);
        }

        let (request, started) = self.cache.pending_or_register(url, || {
            let cache = Arc::clone(&self.cache);
            let fetcher = self.fetcher.clone();
            let parser = self.parser.clone();
            let url = url.to_string();
            let mime = mime.to_string();
            let label = if label.is_empty() {
                derive_label(&url)
            } else {
                label.to_string()
            };
            let cancel = cancel.clone();
            async move {
                let result = load(&fetcher, &parser, &url, &mime, &label, cancel).await;
                if let Ok(spectrum) = &result {
                    cache.set(&url, Arc::clone(spectrum));
                    info!(url = %url, points = spectrum.len(), series = spectrum.series.len(), "cached dataset");
                }
                result
            }
        });
        if !started {
            debug!(url, "joining pending request");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = request => result,
        }
    }

    /// Cancel the in-flight fetch for `url`. Returns false if none is running.
    pub fn cancel(&self, url: &str) -> bool {
        self.fetcher.cancel(url)
    }

    /// Stop the sweep task and drop every cached entry.
    pub fn teardown(&mut self) {
        if let Some(task) = self.sweeper.take() {
            task.abort();
        }
        self.cache.clear();
    }
}

impl<T> Drop for DatasetContext<T> {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.take() {
            task.abort();
        }
    }
}

async fn load<T: Transport>(
    fetcher: &SecureFetcher<T>,
    parser: &TabularParser,
    url: &str,
    mime: &str,
    label: &str,
    cancel: CancellationHandle,
) -> DatasetResult {
    let raw = fetcher.fetch(url, mime, cancel).await?;
    let spectrum = parser.parse(&raw.text, url, label, &raw.mime)?;
    Ok(Arc::new(spectrum))
}

fn spawn_sweeper(cache: Weak<DatasetCache>, every: Duration) -> Option<JoinHandle<()>> {
    let runtime = Handle::try_current().ok()?;
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            cache.cleanup();
        }
    }))
}

/// Human-readable name for a dataset URL: the last non-empty path segment,
/// or the URL itself.
pub fn derive_label(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()?
                .rev()
                .find(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| url.to_string())
}
