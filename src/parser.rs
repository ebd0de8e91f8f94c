//! Tabular text to [`ParsedSpectrum`] conversion.

use std::borrow::Cow;
use std::io::Cursor;

use tracing::{debug, warn};

use crate::cell::{Cell, classify_row, is_blank_row, is_numeric_row};
use crate::columns::classify_columns;
use crate::detect::{Delimiter, detect_delimiter, normalize_space_separated};
use crate::encoding::strip_bom;
use crate::error::{ParseError, Result};
use crate::lttb::select_indices;
use crate::model::{ParsedSpectrum, Series};
use crate::validate::{essence, is_tab_separated_mime};

/// Default maximum number of points per series.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

/// Number of leading rows examined for a header.
pub const HEADER_SCAN_ROWS: usize = 5;

/// Parser turning delimited text into a normalized spectrum.
///
/// # Example
///
/// ```
/// use spectrum_ingest::TabularParser;
///
/// let mut parser = TabularParser::new();
/// parser.max_points(500);
///
/// let spectrum = parser
///     .parse("wavelength,intensity\n400,0.12\n410,0.15", "demo", "Demo", "text/csv")
///     .unwrap();
/// assert_eq!(spectrum.x_label, "wavelength");
/// assert_eq!(spectrum.x_values, vec![400.0, 410.0]);
/// ```
#[derive(Debug, Clone)]
pub struct TabularParser {
    /// Maximum points kept per series; longer inputs are downsampled.
    max_points: usize,
}

impl Default for TabularParser {
    fn default() -> Self {
        Self::new()
    }
}

/// A raw record together with its classified cells.
struct Row {
    fields: Vec<String>,
    cells: Vec<Cell>,
}

/// One surviving data row after numeric extraction.
struct DataPoint {
    x: f64,
    ys: Vec<f64>,
}

impl TabularParser {
    /// Create a new parser with default settings.
    pub fn new() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    /// Set the maximum number of points per series. `0` disables downsampling.
    pub fn max_points(&mut self, max_points: usize) -> &mut Self {
        self.max_points = max_points;
        self
    }

    /// Returns the configured point limit.
    pub fn point_limit(&self) -> usize {
        self.max_points
    }

    /// Parse `text` into a spectrum.
    ///
    /// The delimiter is detected from the first non-blank line unless `mime`
    /// is `text/tab-separated-values`, which forces tab.
    pub fn parse(&self, text: &str, id: &str, label: &str, mime: &str) -> Result<ParsedSpectrum> {
        let text = strip_bom(text);

        let delimiter = if is_tab_separated_mime(mime) {
            Delimiter::Tab
        } else {
            detect_delimiter(text)
        };

        let text: Cow<'_, str> = match delimiter {
            Delimiter::Space => Cow::Owned(normalize_space_separated(text)),
            _ => Cow::Borrowed(text),
        };

        let rows = read_rows(&text, delimiter);
        if rows.is_empty() {
            return Err(ParseError::EmptyDataset);
        }

        let (headers, data_rows) = split_header(&rows);
        if headers.len() < 2 {
            return Err(ParseError::InsufficientColumns {
                found: headers.len(),
            });
        }

        let roles = classify_columns(headers.as_slice());
        debug!(
            x_column = roles.x,
            x_label = %headers[roles.x],
            series = roles.y.len(),
            "classified columns"
        );

        let mut points: Vec<DataPoint> = data_rows
            .iter()
            .filter_map(|row| {
                let x = row.cells.get(roles.x).and_then(Cell::as_f64)?;
                let ys: Vec<f64> = roles
                    .y
                    .iter()
                    .map(|&j| row.cells.get(j).and_then(Cell::as_f64).unwrap_or(f64::NAN))
                    .collect();
                if ys.iter().all(|v| v.is_nan()) {
                    return None;
                }
                Some(DataPoint { x, ys })
            })
            .collect();

        if points.is_empty() {
            return Err(ParseError::NoValidData);
        }
        debug!(
            kept = points.len(),
            dropped = data_rows.len() - points.len(),
            "extracted numeric rows"
        );

        // sort_by is stable, so equal X values keep their input order
        points.sort_by(|a, b| a.x.total_cmp(&b.x));

        let mut x_values: Vec<f64> = points.iter().map(|p| p.x).collect();
        let mut series: Vec<Series> = roles
            .y
            .iter()
            .enumerate()
            .map(|(k, &j)| Series {
                label: headers[j].clone(),
                y_values: points.iter().map(|p| p.ys[k]).collect(),
            })
            .collect();

        if self.max_points > 0 && x_values.len() > self.max_points {
            let reference: Vec<(f64, f64)> = x_values
                .iter()
                .copied()
                .zip(series[0].y_values.iter().copied())
                .collect();
            let keep = select_indices(&reference, self.max_points);
            debug!(
                from = x_values.len(),
                to = keep.len(),
                "downsampled with LTTB"
            );
            x_values = pick(&x_values, &keep);
            for s in &mut series {
                s.y_values = pick(&s.y_values, &keep);
            }
        }

        Ok(ParsedSpectrum {
            id: id.to_string(),
            label: label.to_string(),
            x_values,
            x_label: headers[roles.x].clone(),
            series,
            mime_type: essence(mime),
        })
    }
}

/// Parse `text` with default settings.
pub fn parse_dataset(text: &str, id: &str, label: &str, mime: &str) -> Result<ParsedSpectrum> {
    TabularParser::new().parse(text, id, label, mime)
}

/// Split text into quote-aware records, dropping fully blank rows.
fn read_rows(text: &str, delimiter: Delimiter) -> Vec<Row> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter.as_byte())
        .has_headers(false)
        .flexible(true)
        .quoting(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {
                let cells = classify_row(record.iter());
                if is_blank_row(&cells) {
                    continue;
                }
                let fields = record.iter().map(|f| f.trim().to_string()).collect();
                rows.push(Row { fields, cells });
            }
            Ok(false) => break,
            Err(e) => {
                warn!(error = %e, rows = rows.len(), "stopping at malformed record");
                break;
            }
        }
    }
    rows
}

/// Locate the header among the first [`HEADER_SCAN_ROWS`] rows.
///
/// The last non-numeric row before the first fully numeric row is the
/// header. Without one, headers are synthesized and every row is data.
fn split_header(rows: &[Row]) -> (Vec<String>, &[Row]) {
    let mut header_idx = None;
    for (i, row) in rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
        if is_numeric_row(&row.cells) {
            break;
        }
        header_idx = Some(i);
    }

    match header_idx {
        Some(i) => {
            let headers = rows[i]
                .fields
                .iter()
                .enumerate()
                .map(|(n, name)| {
                    if name.is_empty() {
                        column_name(n)
                    } else {
                        name.clone()
                    }
                })
                .collect();
            debug!(header_row = i, "found header row");
            (headers, &rows[i + 1..])
        }
        None => {
            let headers = (0..rows[0].fields.len()).map(column_name).collect();
            (headers, rows)
        }
    }
}

fn column_name(index: usize) -> String {
    format!("Column {}", index + 1)
}

fn pick(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| values[i]).collect()
}
