//! Error taxonomy for fetches.
//!
//! Every failed fetch maps to exactly one [`CrawlerError`] variant. The
//! variant decides the retry class (see [`classify_error`](super::classify_error))
//! and is what the orchestrator records per source.

use thiserror::Error;

use super::rate_limiter::DenyReason;

/// Coarse kind of a [`CrawlerError`], for reporting and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimitExceeded,
    MovieNotFound,
    SiteBlocked,
    SitePermission,
    Credential,
    WebsiteError,
    ProxyExhausted,
    Other,
}

/// Errors that can occur while fetching a page through the resilient client.
#[derive(Debug, Clone, Error)]
pub enum CrawlerError {
    /// Admission was denied by the rate limiter.
    #[error("rate limit exceeded fetching {url}: {reason}\n  Suggestion: Lower concurrency or raise rate_limit.max_wait_ms")]
    RateLimitExceeded {
        /// URL that was not fetched.
        url: String,
        /// Why admission was denied.
        reason: DenyReason,
    },

    /// The site has no such title (HTTP 404 or a "not found" page).
    #[error("title not found at {url}")]
    MovieNotFound {
        /// URL that reported the title missing.
        url: String,
    },

    /// Anti-automation measures blocked the request.
    #[error(
        "blocked by anti-automation at {url} (HTTP {status}, confidence {confidence:.2})\n  Suggestion: Enable the proxy pool or lower the request rate"
    )]
    SiteBlocked {
        /// URL that was blocked.
        url: String,
        /// Response status.
        status: u16,
        /// Combined detection confidence (0.0-1.0).
        confidence: f64,
    },

    /// The site refuses access for this client or region (402, 451).
    #[error("site refused access to {url} (HTTP {status})")]
    SitePermission {
        /// URL that was refused.
        url: String,
        /// Response status.
        status: u16,
    },

    /// Credentials are required or were rejected (401, 407).
    #[error(
        "credentials required for {url} (HTTP {status})\n  Suggestion: {suggestion}"
    )]
    Credential {
        /// URL that needs credentials.
        url: String,
        /// Response status.
        status: u16,
        /// User-facing hint.
        suggestion: &'static str,
    },

    /// Transient site or transport failure: 5xx, 429, timeouts, connection errors.
    #[error("site error fetching {url}: {message}")]
    WebsiteError {
        /// URL that failed.
        url: String,
        /// Response status, if a response was received.
        status: Option<u16>,
        /// Raw `Retry-After` header value, if the site sent one.
        retry_after: Option<String>,
        /// Description of the failure.
        message: String,
    },

    /// The proxy pool is enabled but no proxy is selectable.
    #[error(
        "no usable proxy for {url}\n  Suggestion: All proxies are disabled; wait for health checks or add entries"
    )]
    ProxyExhausted {
        /// URL that was not fetched.
        url: String,
    },

    /// Anything else, including parse failures.
    #[error("failed to fetch {url}: {message}")]
    Other {
        /// URL involved.
        url: String,
        /// Description of the failure.
        message: String,
    },
}

impl CrawlerError {
    /// Creates a rate-limit denial error.
    pub fn rate_limited(url: impl Into<String>, reason: DenyReason) -> Self {
        Self::RateLimitExceeded {
            url: url.into(),
            reason,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::MovieNotFound { url: url.into() }
    }

    /// Creates a blocked error.
    pub fn blocked(url: impl Into<String>, status: u16, confidence: f64) -> Self {
        Self::SiteBlocked {
            url: url.into(),
            status,
            confidence,
        }
    }

    /// Creates a transport-level site error (no response received).
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WebsiteError {
            url: url.into(),
            status: None,
            retry_after: None,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::transport(url, "request timed out")
    }

    /// Creates a proxy-exhausted error.
    pub fn proxy_exhausted(url: impl Into<String>) -> Self {
        Self::ProxyExhausted { url: url.into() }
    }

    /// Creates a catch-all error.
    pub fn other(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Maps a non-success HTTP status to its error variant.
    ///
    /// | Status | Variant |
    /// |--------|---------|
    /// | 401, 407 | `Credential` |
    /// | 402, 451 | `SitePermission` |
    /// | 403 | `SiteBlocked` |
    /// | 404, 410 | `MovieNotFound` |
    /// | 408, 425, 429, 5xx | `WebsiteError` |
    /// | other | `Other` |
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn from_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        let url = url.into();
        match status {
            401 => Self::Credential {
                url,
                status,
                suggestion: "Provide site credentials or cookies for this source",
            },
            407 => Self::Credential {
                url,
                status,
                suggestion: "Check the proxy username and password in proxy.entries",
            },
            402 | 451 => Self::SitePermission { url, status },
            403 => Self::SiteBlocked {
                url,
                status,
                confidence: 0.0,
            },
            404 | 410 => Self::MovieNotFound { url },
            408 | 425 | 429 => Self::WebsiteError {
                url,
                status: Some(status),
                retry_after,
                message: format!("HTTP {status}"),
            },
            500..=599 => Self::WebsiteError {
                url,
                status: Some(status),
                retry_after,
                message: format!("HTTP {status}"),
            },
            _ => Self::Other {
                url,
                message: format!("unexpected HTTP {status}"),
            },
        }
    }

    /// Coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::MovieNotFound { .. } => ErrorKind::MovieNotFound,
            Self::SiteBlocked { .. } => ErrorKind::SiteBlocked,
            Self::SitePermission { .. } => ErrorKind::SitePermission,
            Self::Credential { .. } => ErrorKind::Credential,
            Self::WebsiteError { .. } => ErrorKind::WebsiteError,
            Self::ProxyExhausted { .. } => ErrorKind::ProxyExhausted,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// URL the error refers to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::RateLimitExceeded { url, .. }
            | Self::MovieNotFound { url }
            | Self::SiteBlocked { url, .. }
            | Self::SitePermission { url, .. }
            | Self::Credential { url, .. }
            | Self::WebsiteError { url, .. }
            | Self::ProxyExhausted { url }
            | Self::Other { url, .. } => url,
        }
    }

    /// HTTP status attached to the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::SiteBlocked { status, .. }
            | Self::SitePermission { status, .. }
            | Self::Credential { status, .. } => Some(*status),
            Self::WebsiteError { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        let url = "https://example.com/v/IPX-177";
        assert_eq!(CrawlerError::from_status(url, 404, None).kind(), ErrorKind::MovieNotFound);
        assert_eq!(CrawlerError::from_status(url, 410, None).kind(), ErrorKind::MovieNotFound);
        assert_eq!(CrawlerError::from_status(url, 403, None).kind(), ErrorKind::SiteBlocked);
        assert_eq!(CrawlerError::from_status(url, 401, None).kind(), ErrorKind::Credential);
        assert_eq!(CrawlerError::from_status(url, 407, None).kind(), ErrorKind::Credential);
        assert_eq!(CrawlerError::from_status(url, 451, None).kind(), ErrorKind::SitePermission);
        assert_eq!(CrawlerError::from_status(url, 429, None).kind(), ErrorKind::WebsiteError);
        assert_eq!(CrawlerError::from_status(url, 503, None).kind(), ErrorKind::WebsiteError);
        assert_eq!(CrawlerError::from_status(url, 400, None).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_from_status_keeps_retry_after() {
        let err = CrawlerError::from_status("u", 429, Some("5".to_string()));
        match err {
            CrawlerError::WebsiteError { retry_after, status, .. } => {
                assert_eq!(retry_after.as_deref(), Some("5"));
                assert_eq!(status, Some(429));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_accessors() {
        let err = CrawlerError::blocked("https://a/b", 200, 0.7);
        assert_eq!(err.url(), "https://a/b");
        assert_eq!(err.status(), Some(200));
        assert_eq!(CrawlerError::timeout("u").status(), None);
    }

    #[test]
    fn test_display_includes_suggestion() {
        let msg = CrawlerError::proxy_exhausted("https://a").to_string();
        assert!(msg.contains("Suggestion:"));
        let msg = CrawlerError::from_status("https://a", 407, None).to_string();
        assert!(msg.contains("proxy"));
    }
}
