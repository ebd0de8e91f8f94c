//! UTF-8 validation and streaming decode using simdutf8 and `encoding_rs`.

use encoding_rs::{CoderResult, Decoder, UTF_8};
use simdutf8::basic::from_utf8;

/// Check if the given bytes are valid UTF-8.
///
/// Uses SIMD-accelerated validation for performance.
pub fn is_utf8(data: &[u8]) -> bool {
    from_utf8(data).is_ok()
}

/// Strip a leading BOM character from already decoded text.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{FEFF}').unwrap_or(text)
}

/// Incremental UTF-8 decoder for chunked bodies.
///
/// Multi-byte sequences split across chunk boundaries are carried over to
/// the next call. A leading BOM is dropped and malformed sequences are
/// replaced with U+FFFD.
pub struct Utf8StreamDecoder {
    decoder: Decoder,
    text: String,
    replaced: bool,
}

impl Default for Utf8StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Utf8StreamDecoder {
    /// Create a new decoder with an empty output buffer.
    pub fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder_with_bom_removal(),
            text: String::new(),
            replaced: false,
        }
    }

    /// Decode one chunk, appending to the internal buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.decode(chunk, false);
    }

    /// Flush pending bytes and return the decoded text.
    pub fn finish(mut self) -> String {
        self.decode(&[], true);
        self.text
    }

    /// Whether any malformed sequence has been replaced so far.
    pub fn had_replacements(&self) -> bool {
        self.replaced
    }

    fn decode(&mut self, mut src: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3).saturating_add(4));
            self.text.reserve(needed);

            let (result, read, replaced) = self.decoder.decode_to_string(src, &mut self.text, last);
            self.replaced |= replaced;
            src = &src[read..];

            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}
