//! Request resilience layer.
//!
//! [`ResilientClient`] turns one logical fetch into as many physical attempts
//! as the retry policy allows, passing each through the [`RateLimiter`], the
//! [`ProxyManager`] and the [`AntiBotDetector`]. Failures surface as a
//! [`CrawlerError`] whose variant decides whether the attempt is retried.

mod cache;
mod client;
mod detector;
mod encoding;
mod error;
mod proxy;
mod rate_limiter;
mod response;
mod retry;

pub use cache::{ResponseCache, TtlLruCache, spawn_sweeper};
pub use client::{FetchOptions, ResilientClient};
pub use detector::{AntiBotDetector, DetectionResult, Signal};
pub use encoding::decode_body;
pub use error::{CrawlerError, ErrorKind};
pub use proxy::{HttpProxyProbe, ProxyEntry, ProxyManager, ProxyProbe};
pub use rate_limiter::{Admission, DenyReason, RateLimiter, RateLimiterStats, parse_retry_after};
pub use response::FetchResponse;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
