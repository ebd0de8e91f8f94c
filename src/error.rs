use thiserror::Error;

/// Error type for turning tabular text into a spectrum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No non-blank rows in the input.
    #[error("Empty dataset: no rows to parse")]
    EmptyDataset,

    /// The header row has fewer than two columns.
    #[error("Insufficient columns: need at least 2, found {found}")]
    InsufficientColumns { found: usize },

    /// Every row was discarded during numeric extraction.
    #[error("No valid data: no row has a numeric X value and at least one numeric Y value")]
    NoValidData,
}

/// Result type alias for parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Error type for fetching and ingesting a remote dataset.
///
/// Cloneable so a single coalesced request can hand the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// URL scheme or declared MIME type rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure or non-success HTTP status.
    #[error("{}", network_message(.status, .message))]
    Network { status: Option<u16>, message: String },

    /// The server answered with a content type outside the allowed set.
    #[error("Content type mismatch: server returned {content_type:?}")]
    ContentTypeMismatch { content_type: String },

    /// Payload larger than the configured limit.
    #[error("Payload exceeds {limit} bytes (observed {observed})")]
    SizeExceeded { limit: u64, observed: u64 },

    /// The payload arrived but could not be turned into a spectrum.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The request was cancelled.
    #[error("Request cancelled")]
    Cancelled,
}

fn network_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Network error: HTTP {code}: {message}"),
        None => format!("Network error: {message}"),
    }
}

impl FetchError {
    /// Returns true if this error came from cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// HTTP status carried by a network error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

/// Error raised by a [`Transport`](crate::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        FetchError::Network {
            status: None,
            message: err.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_folds_into_fetch_error() {
        let err: FetchError = ParseError::NoValidData.into();
        assert_eq!(err, FetchError::Parse(ParseError::NoValidData));
        assert!(err.to_string().starts_with("Parse error"));
    }

    #[test]
    fn test_network_display_includes_status() {
        let err = FetchError::Network {
            status: Some(404),
            message: "Not Found".to_string(),
        };
        assert_eq!(err.to_string(), "Network error: HTTP 404: Not Found");
        assert_eq!(err.status(), Some(404));

        let err: FetchError = TransportError("connection reset".to_string()).into();
        assert_eq!(err.to_string(), "Network error: connection reset");
        assert_eq!(err.status(), None);
    }
}
