//! Decoded HTTP response handed to detectors, caches and source adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// A fully read and charset-decoded response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    /// Body decoded to UTF-8.
    pub body: String,
    /// Label of the charset the body was decoded from.
    pub charset: &'static str,
    /// Time from send to fully read body.
    pub elapsed: Duration,
    /// Id of the proxy that carried the request, if any.
    pub proxy: Option<String>,
}

impl FetchResponse {
    /// Creates a UTF-8 response with no headers.
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            charset: "UTF-8",
            elapsed: Duration::ZERO,
            proxy: None,
        }
    }

    /// Adds a header; invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// First value of `name` as text, if present and printable.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
