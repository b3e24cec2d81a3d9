//! Retry classification and exponential backoff for failed fetches.
//!
//! A failed fetch is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - site/transport trouble that may clear up (5xx, 429, timeouts, anything unclassified)
//! - [`FailureType::Blocked`] - anti-automation block; worth retrying only through another proxy
//! - [`FailureType::Terminal`] - retrying cannot help (404, credentials, permissions, admission denials)
//!
//! [`RetryPolicy::should_retry`] then decides based on the class and attempt
//! count, with exponential backoff plus random jitter.
//!
//! # Example
//!
//! ```
//! use metascraper_core::http::{classify_error, CrawlerError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = CrawlerError::from_status("https://example.com/v/IPX-177", 503, None);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::CrawlerError;
use crate::config::RetryConfig;

/// Retry class of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on a plain retry.
    Transient,
    /// Blocked by anti-automation; retry only with a rotated proxy.
    Blocked,
    /// Retrying cannot help.
    Terminal,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry behavior with exponential backoff.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds a policy from config.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.multiplier,
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }

    /// Creates a policy with a custom `max_attempts`, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Terminal {
            return RetryDecision::DoNotRetry {
                reason: "terminal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            ?failure_type,
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a fetch error into its retry class.
///
/// | Error | Class |
/// |-------|-------|
/// | `WebsiteError` (5xx, 429, timeout, transport) | Transient |
/// | `ProxyExhausted`, `Other` | Transient |
/// | `SiteBlocked` | Blocked |
/// | `MovieNotFound`, `Credential`, `SitePermission` | Terminal |
/// | `RateLimitExceeded` | Terminal |
#[must_use]
pub fn classify_error(error: &CrawlerError) -> FailureType {
    match error {
        CrawlerError::WebsiteError { .. }
        | CrawlerError::ProxyExhausted { .. }
        | CrawlerError::Other { .. } => FailureType::Transient,
        CrawlerError::SiteBlocked { .. } => FailureType::Blocked,
        CrawlerError::MovieNotFound { .. }
        | CrawlerError::Credential { .. }
        | CrawlerError::SitePermission { .. }
        | CrawlerError::RateLimitExceeded { .. } => FailureType::Terminal,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_attempts,
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            multiplier: 2.0,
            max_jitter_ms: 500,
        })
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_terminal_never_retries() {
        let decision = RetryPolicy::default().should_retry(FailureType::Terminal, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let policy = policy(3, 1_000, 32_000);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Blocked, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = policy(5, 1_000, 32_000);
        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1500));
        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_respects_max_delay() {
        let policy = policy(10, 1_000, 5_000);
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_zero_jitter() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_jitter_ms: 0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= Duration::from_millis(500));
        }
    }

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_classify_by_status() {
        let url = "https://example.com/v/IPX-177";
        let classify = |status| classify_error(&CrawlerError::from_status(url, status, None));
        assert_eq!(classify(404), FailureType::Terminal);
        assert_eq!(classify(401), FailureType::Terminal);
        assert_eq!(classify(451), FailureType::Terminal);
        assert_eq!(classify(403), FailureType::Blocked);
        assert_eq!(classify(429), FailureType::Transient);
        assert_eq!(classify(500), FailureType::Transient);
        assert_eq!(classify(504), FailureType::Transient);
        assert_eq!(classify(418), FailureType::Transient);
    }

    #[test]
    fn test_classify_transport_and_timeout() {
        assert_eq!(
            classify_error(&CrawlerError::timeout("u")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&CrawlerError::transport("u", "connection refused")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&CrawlerError::proxy_exhausted("u")),
            FailureType::Transient
        );
    }

    #[test]
    fn test_classify_denial_is_terminal() {
        let error = CrawlerError::rate_limited("u", crate::http::DenyReason::QueueFull);
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }
}
