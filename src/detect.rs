//! Delimiter sniffing and whitespace normalization for tabular text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// A line made only of numbers separated by spaces, e.g. `400 0.12 1e-3`.
static NUMERIC_SPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?(?: +[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)+$",
    )
    .expect("Invalid numeric-space pattern")
});

/// Runs of any whitespace, collapsed to a single tab when normalizing.
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace pattern"));

/// Field separator detected for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Delimiter {
    /// Comma (the fallback).
    #[default]
    Comma,
    /// Tab.
    Tab,
    /// Semicolon.
    Semicolon,
    /// Runs of spaces; normalized to tabs before parsing.
    Space,
}

impl Delimiter {
    /// Byte handed to the CSV reader. Space-separated data is read as tabs
    /// after [`normalize_space_separated`].
    pub const fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab | Delimiter::Space => b'\t',
            Delimiter::Semicolon => b';',
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delimiter::Comma => write!(f, "comma"),
            Delimiter::Tab => write!(f, "tab"),
            Delimiter::Semicolon => write!(f, "semicolon"),
            Delimiter::Space => write!(f, "space"),
        }
    }
}

/// Detect the delimiter from the first non-blank line.
///
/// Space separation wins when the line has no tab, comma or semicolon and
/// either contains a double space or is purely numbers separated by spaces.
/// Otherwise the highest count wins with ties broken tab, semicolon, comma.
pub fn detect_delimiter(text: &str) -> Delimiter {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return Delimiter::Comma;
    };

    let bytes = line.as_bytes();
    let tabs = bytecount::count(bytes, b'\t');
    let commas = bytecount::count(bytes, b',');
    let semicolons = bytecount::count(bytes, b';');

    let delimiter = if tabs == 0 && commas == 0 && semicolons == 0 {
        let trimmed = line.trim();
        if trimmed.contains("  ") || NUMERIC_SPACE_PATTERN.is_match(trimmed) {
            Delimiter::Space
        } else {
            Delimiter::Comma
        }
    } else if tabs >= semicolons && tabs >= commas {
        Delimiter::Tab
    } else if semicolons >= commas {
        Delimiter::Semicolon
    } else {
        Delimiter::Comma
    };

    debug!(%delimiter, tabs, commas, semicolons, "detected delimiter");
    delimiter
}

/// Rewrite space-separated text as tab-separated text.
///
/// Each non-blank line is trimmed and every whitespace run becomes a single
/// tab. Blank lines are dropped.
pub fn normalize_space_separated(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(&WHITESPACE_RUN.replace_all(trimmed, "\t"));
        out.push('\n');
    }
    out
}
