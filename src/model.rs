use serde::Serialize;

/// Decoded payload handed from the fetcher to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    /// Decoded UTF-8 text.
    pub text: String,
    /// Effective MIME type: the server's content type when present,
    /// otherwise the caller's declared type.
    pub mime: String,
}

impl RawContent {
    /// Create a new `RawContent`.
    pub fn new(text: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mime: mime.into(),
        }
    }
}

/// One named sequence of Y values sharing the spectrum's X axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    /// Column header text.
    pub label: String,
    /// Values aligned by position with [`ParsedSpectrum::x_values`].
    /// Invalid cells are kept as `NaN` placeholders.
    pub y_values: Vec<f64>,
}

/// A normalized multi-series dataset ready for plotting.
///
/// Invariants established by the parser:
/// - every series has exactly `x_values.len()` values
/// - `x_values` is non-decreasing
/// - there is at least one series
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSpectrum {
    /// Identifier, usually the source URL.
    pub id: String,
    /// Human-readable name.
    pub label: String,
    /// Shared X axis.
    pub x_values: Vec<f64>,
    /// Header text of the X column.
    pub x_label: String,
    /// Y series in original column order.
    pub series: Vec<Series>,
    /// Normalized MIME type of the source.
    pub mime_type: String,
}

impl ParsedSpectrum {
    /// Number of points on the X axis.
    #[inline]
    pub fn len(&self) -> usize {
        self.x_values.len()
    }

    /// Returns true if there are no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_values.is_empty()
    }

    /// Range of the X axis as `(min, max)`.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        Some((*self.x_values.first()?, *self.x_values.last()?))
    }

    /// Labels of all series.
    pub fn series_labels(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.label.as_str()).collect()
    }
}
