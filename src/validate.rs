//! URL scheme and MIME type checks applied before any network call.

use url::Url;

/// MIME types accepted for declared and served content.
pub const ALLOWED_MIME_TYPES: &[&str] = &["text/csv", "text/plain", "text/tab-separated-values"];

/// MIME type that forces tab as the delimiter.
pub const TSV_MIME: &str = "text/tab-separated-values";

/// Returns true only for well-formed `http` or `https` URLs.
pub fn is_allowed_url(url: &str) -> bool {
    match Url::parse(url.trim()) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Normalize a MIME string: drop parameters, trim, lowercase.
///
/// `"Text/CSV; charset=utf-8"` becomes `"text/csv"`.
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Returns true if the MIME type, parameters stripped, is in [`ALLOWED_MIME_TYPES`].
pub fn is_allowed_mime(mime: &str) -> bool {
    let essence = essence(mime);
    ALLOWED_MIME_TYPES.contains(&essence.as_str())
}

/// Returns true if the MIME type forces tab-delimited parsing.
pub fn is_tab_separated_mime(mime: &str) -> bool {
    essence(mime) == TSV_MIME
}
