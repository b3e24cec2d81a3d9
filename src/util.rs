//! Small shared helpers: static regex compilation, URL joining and text cleanup.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\d+(?:\.\d+)?"));

/// Collapses runs of whitespace to a single space and trims both ends.
#[must_use]
pub fn collapse_whitespace(value: &str) -> String {
    WHITESPACE_RE.replace_all(value.trim(), " ").into_owned()
}

/// Returns the first decimal number in `value` (e.g. `"120分"` gives `120.0`).
#[must_use]
pub fn first_number(value: &str) -> Option<f64> {
    NUMBER_RE
        .find(value)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Returns the value as-is if it already starts with `http://` or `https://`;
/// normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: Option<&Url>) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if let Some(rest) = value.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    base_url
        .and_then(|base| base.join(value).ok())
        .map(|url| url.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("120分"), Some(120.0));
        assert_eq!(first_number("score: 4.5 / 5"), Some(4.5));
        assert_eq!(first_number("none"), None);
    }

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("https://example.com/v/abc").unwrap();
        assert_eq!(
            absolutize_url("https://cdn.example.com/a.jpg", Some(&base)).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            absolutize_url("//cdn.example.com/a.jpg", Some(&base)).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            absolutize_url("/img/a.jpg", Some(&base)).as_deref(),
            Some("https://example.com/img/a.jpg")
        );
        assert_eq!(absolutize_url("/img/a.jpg", None), None);
        assert_eq!(absolutize_url("   ", Some(&base)), None);
    }
}
