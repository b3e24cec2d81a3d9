//! Charset detection and decoding of response bodies.
//!
//! Japanese catalog sites still serve Shift_JIS and EUC-JP pages, often with a
//! missing or wrong `Content-Type` charset. Decoding order:
//!
//! 1. `charset=` parameter of the `Content-Type` header
//! 2. `<meta charset>` / `http-equiv` declaration in the first 2 KiB
//! 3. valid UTF-8
//! 4. the first of Shift_JIS, EUC-JP, GBK that decodes without errors
//! 5. windows-1252 (never fails)

use std::sync::LazyLock;

use encoding_rs::{EUC_JP, Encoding, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use regex::Regex;
use tracing::trace;

use crate::util::compile_static_regex;

/// Bytes scanned for a `<meta>` charset declaration.
const META_SNIFF_BYTES: usize = 2048;

static HEADER_CHARSET_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9_\-:.]+)"#));

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_\-:.]+)"#)
});

/// Decodes `bytes` to a `String`, returning the text and the encoding used.
#[must_use]
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> (String, &'static Encoding) {
    if let Some(encoding) = content_type.and_then(|ct| label_from(&HEADER_CHARSET_RE, ct)) {
        trace!(encoding = encoding.name(), "charset from Content-Type");
        return decode_with(encoding, bytes);
    }

    let head = &bytes[..bytes.len().min(META_SNIFF_BYTES)];
    let head_text = String::from_utf8_lossy(head);
    if let Some(encoding) = label_from(&META_CHARSET_RE, &head_text) {
        trace!(encoding = encoding.name(), "charset from meta tag");
        return decode_with(encoding, bytes);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), UTF_8);
    }

    for encoding in [SHIFT_JIS, EUC_JP, GBK] {
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        if !had_errors {
            trace!(encoding = encoding.name(), "charset sniffed");
            return (text.into_owned(), encoding);
        }
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    (text.into_owned(), WINDOWS_1252)
}

fn label_from(regex: &Regex, haystack: &str) -> Option<&'static Encoding> {
    regex
        .captures(haystack)
        .and_then(|caps| Encoding::for_label(caps[1].trim().as_bytes()))
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> (String, &'static Encoding) {
    let (text, used, _) = encoding.decode(bytes);
    (text.into_owned(), used)
}
