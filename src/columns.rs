//! Axis-role classification of header columns.
//!
//! The X column is chosen by testing header names against an ordered list of
//! patterns. The first pattern that matches any column wins; every other
//! column becomes a Y series.

use std::sync::LazyLock;

use regex::Regex;

/// Ordered X-axis header patterns, all case-insensitive.
///
/// Exact `x`, then name prefixes for common spectral axes, then exact unit
/// names.
static X_AXIS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^x$",
        r"(?i)^wavelength",
        r"(?i)^wavenumber",
        r"(?i)^energy",
        r"(?i)^frequency",
        r"(?i)^channel",
        r"(?i)^position",
        r"(?i)^time",
        r"(?i)^index",
        r"(?i)^nm$",
        r"(?i)^ev$",
        r"(?i)^kev$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid x-axis pattern"))
    .collect()
});

/// Which columns play the X and Y roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRoles {
    /// Index of the X column.
    pub x: usize,
    /// Indices of the Y columns, left to right.
    pub y: Vec<usize>,
}

/// Find the X column for the given headers.
///
/// Returns the index of the first header matching the highest-priority
/// pattern, or 0 when nothing matches.
pub fn find_x_column<S: AsRef<str>>(headers: &[S]) -> usize {
    X_AXIS_PATTERNS
        .iter()
        .find_map(|pattern| {
            headers
                .iter()
                .position(|h| pattern.is_match(h.as_ref().trim()))
        })
        .unwrap_or(0)
}

/// Assign X and Y roles to every column.
pub fn classify_columns<S: AsRef<str>>(headers: &[S]) -> ColumnRoles {
    let x = find_x_column(headers);
    let y = (0..headers.len()).filter(|&i| i != x).collect();
    ColumnRoles { x, y }
}
