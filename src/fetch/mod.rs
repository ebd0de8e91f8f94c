//! Bounded, cancellable retrieval of remote tabular text.
//!
//! [`SecureFetcher`] validates the request, coalesces concurrent fetches of
//! the same URL, enforces the payload limit while streaming, and decodes the
//! body as UTF-8. The network itself sits behind the [`Transport`] trait.

mod fetcher;
mod transport;

pub use fetcher::{DEFAULT_MAX_PAYLOAD_BYTES, FetchLimits, FetchResult, SecureFetcher};
pub use transport::{BodyStream, Transport, TransportResponse};

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
