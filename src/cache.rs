//! Time-bounded store of parsed datasets with pending-request coalescing.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use foldhash::{HashMap, HashMapExt};
use tokio::time::Instant;
use tracing::debug;

use crate::error::FetchError;
use crate::inflight::{InFlight, SharedRequest};
use crate::lock;
use crate::model::ParsedSpectrum;

/// Default time-to-live for cached datasets (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Outcome of a dataset request, shared by every coalesced caller.
pub type DatasetResult = Result<Arc<ParsedSpectrum>, FetchError>;

/// Handle to a pending dataset request.
pub type PendingRequest = SharedRequest<DatasetResult>;

/// A cached dataset with its lifetime bounds.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The parsed dataset.
    pub data: Arc<ParsedSpectrum>,
    /// When the entry was stored.
    pub created_at: Instant,
    /// After this instant `get` treats the entry as missing.
    pub expires_at: Instant,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet swept.
    pub entries: usize,
    /// Requests currently in flight.
    pub pending: usize,
}

/// TTL cache keyed by URL.
///
/// Expired entries are evicted lazily on [`get`](Self::get) and in bulk by
/// [`cleanup`](Self::cleanup). Pending requests are held weakly and removed
/// when they settle.
pub struct DatasetCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    pending: InFlight<DatasetResult>,
}

impl Default for DatasetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetCache {
    /// Create a cache with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            pending: InFlight::default(),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the dataset for `url` if present and not expired.
    pub fn get(&self, url: &str) -> Option<Arc<ParsedSpectrum>> {
        let mut entries = lock(&self.entries);
        let entry = entries.get(url)?;
        if Instant::now() > entry.expires_at {
            debug!(url, "evicting expired entry");
            entries.remove(url);
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    /// Store `data` under `url`, replacing any previous entry.
    pub fn set(&self, url: &str, data: impl Into<Arc<ParsedSpectrum>>) {
        let created_at = Instant::now();
        let entry = CacheEntry {
            data: data.into(),
            created_at,
            expires_at: created_at + self.ttl,
        };
        lock(&self.entries).insert(url.to_string(), entry);
    }

    /// Whether an entry exists for `url`, expired or not.
    pub fn has(&self, url: &str) -> bool {
        lock(&self.entries).contains_key(url)
    }

    /// A copy of the stored entry for `url`, expired or not.
    pub fn entry(&self, url: &str) -> Option<CacheEntry> {
        lock(&self.entries).get(url).cloned()
    }

    /// Remove the entry for `url`. Returns true if one was present.
    pub fn delete(&self, url: &str) -> bool {
        lock(&self.entries).remove(url).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Remove expired entries and return how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired entries");
        }
        removed
    }

    /// The in-flight request for `url`, if any.
    pub fn get_pending_request(&self, url: &str) -> Option<PendingRequest> {
        self.pending.join(url)
    }

    /// Register `future` as the in-flight request for `url`.
    ///
    /// The registration is removed once the future settles, whatever the
    /// outcome.
    pub fn set_pending_request<F>(&self, url: &str, future: F) -> PendingRequest
    where
        F: Future<Output = DatasetResult> + Send + 'static,
    {
        self.pending.register(url, future, ())
    }

    /// Join the in-flight request for `url` or register the one built by
    /// `make`. The boolean is true when `make` was called.
    pub fn pending_or_register<F, M>(&self, url: &str, make: M) -> (PendingRequest, bool)
    where
        F: Future<Output = DatasetResult> + Send + 'static,
        M: FnOnce() -> F,
    {
        self.pending.join_or_register(url, || (make(), ()))
    }

    /// Current entry and pending counts.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: lock(&self.entries).len(),
            pending: self.pending.len(),
        }
    }
}
