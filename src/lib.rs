//! spectrum-ingest: remote tabular spectra to plot-ready series
//!
//! Fetches delimited text (CSV, TSV, semicolon or space separated) over
//! HTTP, detects its structure, extracts numeric columns and downsamples
//! oversized series with Largest-Triangle-Three-Buckets. Parsed datasets are
//! cached with a time-to-live, and concurrent requests for the same URL
//! share a single fetch.
//!
//! # Quick Start
//!
//! ```
//! use spectrum_ingest::parse_dataset;
//!
//! let text = "# lamp calibration\nwavelength,counts\n400,12\n410,15\n";
//! let spectrum = parse_dataset(text, "lamp", "Lamp", "text/plain").unwrap();
//!
//! assert_eq!(spectrum.x_label, "wavelength");
//! assert_eq!(spectrum.series_labels(), vec!["counts"]);
//! assert_eq!(spectrum.x_values, vec![400.0, 410.0]);
//! ```
//!
//! # Fetching
//!
//! ```no_run
//! use spectrum_ingest::{ContextConfig, DatasetContext, ReqwestTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ContextConfig::new();
//! config.max_points(2_000);
//!
//! let context = DatasetContext::init(ReqwestTransport::new()?, &config);
//! let spectrum = context
//!     .fetch_dataset("https://example.org/spectra/lamp.tsv", "text/tab-separated-values", "")
//!     .await?;
//! assert_eq!(spectrum.label, "lamp.tsv");
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! 1. Validate the URL scheme and declared MIME type
//! 2. Stream the body under a size cap, decoding UTF-8 across chunk boundaries
//! 3. Detect the delimiter from the first non-blank line
//! 4. Find the header among the leading rows and pick the X column by name
//! 5. Keep rows with a numeric X and at least one numeric Y, sorted by X
//! 6. Downsample every series with the indices LTTB selects for the first one

use std::sync::{Mutex, MutexGuard, PoisonError};

mod cache;
mod cancel;
mod cell;
mod columns;
mod context;
mod detect;
mod encoding;
mod error;
mod fetch;
mod inflight;
mod lttb;
mod model;
mod parser;
mod validate;

pub use error::{FetchError, ParseError, Result, TransportError};
pub use model::{ParsedSpectrum, RawContent, Series};
pub use parser::{DEFAULT_MAX_POINTS, HEADER_SCAN_ROWS, TabularParser, parse_dataset};

pub use cache::{CacheEntry, CacheStats, DEFAULT_TTL, DatasetCache, DatasetResult, PendingRequest};
pub use cancel::CancellationHandle;
pub use context::{ContextConfig, DEFAULT_SWEEP_INTERVAL, DatasetContext, derive_label};
pub use fetch::{
    BodyStream, DEFAULT_MAX_PAYLOAD_BYTES, FetchLimits, FetchResult, SecureFetcher, Transport,
    TransportResponse,
};

#[cfg(feature = "http")]
pub use fetch::ReqwestTransport;

// Re-export for advanced usage
pub use cell::Cell;
pub use columns::{ColumnRoles, classify_columns, find_x_column};
pub use detect::{Delimiter, detect_delimiter, normalize_space_separated};
pub use encoding::{is_utf8, strip_bom};
pub use lttb::{downsample, select_indices};
pub use validate::{ALLOWED_MIME_TYPES, essence, is_allowed_mime, is_allowed_url};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
