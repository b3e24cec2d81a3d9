//! Source adapters: one per external site.
//!
//! A [`SourceAdapter`] turns an [`Identifier`] into a site request through the
//! shared [`ResilientClient`] and parses the response into a [`Record`].
//! Adapters are data driven: [`HtmlSource`] reads a CSS selector table and
//! [`JsonSource`] a JSON-pointer table, both from [`SourceDefinition`]s in the
//! engine config. [`SourceRegistry`] holds the adapters and the per-format
//! priority tables the orchestrator walks.
//!
//! [`ResilientClient`]: crate::http::ResilientClient
//! [`SourceDefinition`]: crate::config::SourceDefinition

mod html;
mod json;
mod registry;

pub use html::HtmlSource;
pub use json::JsonSource;
pub use registry::{SourceRegistry, build_registry};

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tokio::time::Instant;

use crate::http::{CrawlerError, FetchResponse};
use crate::identifier::{Format, Identifier, classify};
use crate::record::Record;
use crate::util::{compile_static_regex, first_number};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})")
});

/// One adapter invocation, created by the orchestrator per attempt.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    /// Identifier to look up.
    pub identifier: Identifier,
    /// Adapter the request is addressed to.
    pub source_name: String,
    /// Rate limiter priority.
    pub priority: i32,
    /// Point after which the attempt is abandoned.
    pub deadline: Instant,
}

impl ScrapeRequest {
    /// Creates a request that expires `timeout` from now.
    #[must_use]
    pub fn new(
        identifier: Identifier,
        source_name: impl Into<String>,
        priority: i32,
        timeout: Duration,
    ) -> Self {
        Self {
            identifier,
            source_name: source_name.into(),
            priority,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline (zero once expired).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A site that can look up records by identifier.
///
/// Uses `async_trait` so adapters can live in the registry as `Arc<dyn SourceAdapter>`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique source name (used in priority tables and baseline file names).
    fn name(&self) -> &str;

    /// Identifier formats this site carries.
    fn supported_formats(&self) -> &[Format];

    /// Whether this adapter should be asked about `identifier`.
    ///
    /// Eligibility follows the canonical shape of the normalized form, so a
    /// content id and its standard spelling reach the same sites. Sources that
    /// list the parsed format itself (e.g. `content_id`) also match.
    fn is_supported(&self, identifier: &Identifier) -> bool {
        let formats = self.supported_formats();
        formats.contains(&classify(identifier.normalized())) || formats.contains(&identifier.format())
    }

    /// Fetches the detail page or API document for the request.
    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchResponse, CrawlerError>;

    /// Parses a fetched response into a record.
    ///
    /// # Errors
    ///
    /// `MovieNotFound` when the page says the title does not exist, `Other`
    /// when the document cannot be read.
    fn parse(&self, identifier: &Identifier, response: &FetchResponse) -> Result<Record, CrawlerError>;

    /// Fetches and parses.
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Record, CrawlerError> {
        let response = self.fetch(request).await?;
        self.parse(&request.identifier, &response)
    }
}

/// Expands placeholders in a URL template.
///
/// | Placeholder | Value for `IPX-177` |
/// |-------------|---------------------|
/// | `{id}` | `IPX-177` |
/// | `{id_lower}` | `ipx-177` |
/// | `{series}` | `IPX` |
/// | `{number}` | `177` |
/// | `{content_id}` | `ipx00177` |
///
/// Values are percent-encoded.
#[must_use]
pub fn render_url_template(template: &str, identifier: &Identifier) -> String {
    let normalized = identifier.normalized();
    let replacements = [
        ("{id}", normalized.to_string()),
        ("{id_lower}", normalized.to_ascii_lowercase()),
        ("{series}", identifier.series().to_string()),
        ("{number}", identifier.number().to_string()),
        ("{content_id}", identifier.content_id()),
    ];
    replacements
        .iter()
        .fold(template.to_string(), |url, (placeholder, value)| {
            url.replace(placeholder, &urlencoding::encode(value))
        })
}

/// Finds a `YYYY-MM-DD`-like date (any of `-/.` or `年月日` separators) in free text.
pub(crate) fn parse_release_date(value: &str) -> Option<NaiveDate> {
    let caps = DATE_RE.captures(value)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Runtime in minutes from text such as `"120分"` or `"120 min"`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn parse_runtime(value: &str) -> Option<u32> {
    first_number(value)
        .filter(|minutes| *minutes > 0.0 && *minutes < 10_000.0)
        .map(|minutes| minutes.round() as u32)
}

/// Score from text such as `"4.5"` or `"評価: 4.5点"`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn parse_score(value: &str) -> Option<f32> {
    first_number(value).map(|score| score as f32)
}
