//! Engine configuration surface.
//!
//! Every knob the engine consumes lives here: rate-limit parameters, the proxy
//! pool, anti-automation thresholds, retry/backoff settings, source adapter
//! definitions and their per-format priority tables, completeness weights and
//! regression comparison rules.
//!
//! All sections are `serde`-deserializable with per-field defaults, so a config
//! file only needs to name what it overrides:
//!
//! ```
//! use metascraper_core::EngineConfig;
//!
//! let config: EngineConfig =
//!     serde_json::from_str(r#"{ "rate_limit": { "requests_per_second": 0.5 } }"#).unwrap();
//! assert!((config.rate_limit.requests_per_second - 0.5).abs() < f64::EPSILON);
//! assert_eq!(config.rate_limit.max_queue, 100);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::Format;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the expected schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid {
        /// Dotted key of the offending value.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A configured regular expression does not compile.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compile error.
        #[source]
        source: regex::Error,
    },

    /// A configured CSS selector does not parse.
    #[error("invalid selector '{selector}' for source '{source_name}': {reason}")]
    Selector {
        /// Source the selector belongs to.
        source_name: String,
        /// The offending selector.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// The HTTP transport could not be built from the `http`/`proxy` sections.
    #[error("failed to build HTTP client: {source}")]
    HttpClient {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl ConfigError {
    /// Creates an `Invalid` error for the given key.
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Root configuration for the scraping engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Token-bucket admission control.
    pub rate_limit: RateLimitConfig,
    /// Upstream proxy pool.
    pub proxy: ProxyConfig,
    /// Anti-automation signal thresholds.
    pub detection: DetectionConfig,
    /// Retry and backoff parameters.
    pub retry: RetryConfig,
    /// HTTP transport settings.
    pub http: HttpConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Identifier normalizer settings.
    pub normalizer: NormalizerConfig,
    /// Source adapter definitions and priority tables.
    pub sources: SourcesConfig,
    /// Completeness scoring weights.
    pub scoring: CompletenessWeights,
    /// Regression comparison rules.
    pub compare: CompareConfig,
    /// Batch execution limits.
    pub batch: BatchConfig,
}

impl EngineConfig {
    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints and value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;
        self.proxy.validate()?;
        self.retry.validate()?;
        self.batch.validate()?;

        if !(0.0..=1.0).contains(&self.compare.similarity_threshold) {
            return Err(ConfigError::invalid(
                "compare.similarity_threshold",
                "expected a ratio in 0.0..=1.0",
            ));
        }
        if self.cache.capacity == 0 && self.cache.enabled {
            return Err(ConfigError::invalid(
                "cache.capacity",
                "must be at least 1 when the cache is enabled",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for definition in &self.sources.definitions {
            if definition.name.trim().is_empty() {
                return Err(ConfigError::invalid("sources.definitions.name", "must not be empty"));
            }
            if !seen.insert(definition.name.as_str()) {
                return Err(ConfigError::invalid(
                    "sources.definitions.name",
                    format!("duplicate source name '{}'", definition.name),
                ));
            }
        }
        for rule in &self.sources.priorities {
            for name in &rule.order {
                if !seen.contains(name.as_str()) {
                    return Err(ConfigError::invalid(
                        "sources.priorities.order",
                        format!("unknown source '{name}' for format {:?}", rule.format),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Token-bucket and adaptive-control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Disables admission control entirely when false.
    pub enabled: bool,
    /// Initial refill rate (tokens per second).
    pub requests_per_second: f64,
    /// Bucket capacity (burst size).
    pub burst: f64,
    /// Maximum number of queued admissions; beyond this `acquire` is denied.
    pub max_queue: usize,
    /// Longest a queued admission may wait before it is denied.
    pub max_wait_ms: u64,
    /// Consecutive denials that trigger a cooldown window.
    pub cooldown_after_denials: u32,
    /// Length of the cooldown window.
    pub cooldown_ms: u64,
    /// Adaptive refill-rate control.
    pub adaptive: AdaptiveConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 1.0,
            burst: 5.0,
            max_queue: 100,
            max_wait_ms: 30_000,
            cooldown_after_denials: 5,
            cooldown_ms: 60_000,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_second <= 0.0 || !self.requests_per_second.is_finite() {
            return Err(ConfigError::invalid(
                "rate_limit.requests_per_second",
                "must be a positive number",
            ));
        }
        if self.burst < 1.0 {
            return Err(ConfigError::invalid("rate_limit.burst", "must be at least 1"));
        }
        let adaptive = &self.adaptive;
        if adaptive.min_rate <= 0.0 || adaptive.min_rate > adaptive.max_rate {
            return Err(ConfigError::invalid(
                "rate_limit.adaptive.min_rate",
                "must be positive and not exceed max_rate",
            ));
        }
        if !(0.0..=1.0).contains(&adaptive.error_threshold) {
            return Err(ConfigError::invalid(
                "rate_limit.adaptive.error_threshold",
                "expected a ratio in 0.0..=1.0",
            ));
        }
        Ok(())
    }

    /// Queue wait bound as a `Duration`.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Cooldown window as a `Duration`.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Parameters of the periodic refill-rate adjustment loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Whether the adaptive loop adjusts the rate at all.
    pub enabled: bool,
    /// Lower bound for the refill rate.
    pub min_rate: f64,
    /// Upper bound for the refill rate.
    pub max_rate: f64,
    /// Error rate above which the refill rate is halved.
    pub error_threshold: f64,
    /// Error rate below which the rate may grow.
    pub low_error_rate: f64,
    /// Rejection rate below which the rate may grow.
    pub low_rejection_rate: f64,
    /// Trailing window the statistics are computed over.
    pub window_secs: u64,
    /// Minimum samples in the window before any adjustment.
    pub min_samples: usize,
    /// How often the adaptive loop runs.
    pub interval_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_rate: 0.1,
            max_rate: 10.0,
            error_threshold: 0.3,
            low_error_rate: 0.05,
            low_rejection_rate: 0.05,
            window_secs: 60,
            min_samples: 5,
            interval_secs: 10,
        }
    }
}

/// Upstream proxy pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route requests through the pool when true.
    pub enabled: bool,
    /// Pool entries as `host:port[@region][#weight]`, optionally with a scheme.
    pub entries: Vec<String>,
    /// Consecutive failures before an entry is disabled.
    pub failure_threshold: u32,
    /// Interval between background health probes of disabled entries.
    pub health_check_interval_secs: u64,
    /// URL fetched through a proxy to verify reachability.
    pub probe_url: String,
    /// Timeout for a single health probe.
    pub probe_timeout_secs: u64,
    /// Region preferred by default when selecting.
    pub prefer_region: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            entries: Vec::new(),
            failure_threshold: 3,
            health_check_interval_secs: 300,
            probe_url: "https://www.gstatic.com/generate_204".to_string(),
            probe_timeout_secs: 10,
            prefer_region: None,
        }
    }
}

impl ProxyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("proxy.failure_threshold", "must be at least 1"));
        }
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "proxy.health_check_interval_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Header rule for the anti-automation detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Header name (case-insensitive).
    pub name: String,
    /// Regex matched against the header value.
    pub pattern: String,
}

impl HeaderRule {
    /// Creates a header rule.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Additive confidence weights for each detection signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    /// Blocked status code.
    pub status_code: f64,
    /// Challenge/firewall header present.
    pub header_pattern: f64,
    /// Challenge markers in the body.
    pub content_pattern: f64,
    /// Anomalous response latency.
    pub response_time: f64,
    /// Missing expected page structure.
    pub structure: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            status_code: 0.3,
            header_pattern: 0.2,
            content_pattern: 0.4,
            response_time: 0.1,
            structure: 0.2,
        }
    }
}

/// Anti-automation detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Status codes that count as a blocking signal.
    pub blocked_statuses: Vec<u16>,
    /// Header rules that count as a blocking signal.
    pub header_patterns: Vec<HeaderRule>,
    /// Body regexes that count as a blocking signal.
    pub body_patterns: Vec<String>,
    /// Responses slower than this are anomalous.
    pub slow_response_ms: u64,
    /// 2xx bodies shorter than this (after trimming) are structurally suspicious.
    pub min_body_bytes: usize,
    /// Detection history size for the rolling detection-rate statistic.
    pub history_size: usize,
    /// Confidence weights per signal.
    pub weights: SignalWeights,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blocked_statuses: vec![403, 429, 503],
            header_patterns: vec![
                HeaderRule::new("cf-mitigated", ".+"),
                HeaderRule::new("cf-chl-bypass", ".+"),
                HeaderRule::new("server", "(?i)ddos-guard"),
                HeaderRule::new("x-datadome", ".+"),
                HeaderRule::new("x-sucuri-block", ".+"),
            ],
            body_patterns: vec![
                r"(?i)just a moment\.\.\.".to_string(),
                r"(?i)cf-browser-verification|challenge-platform|cf_chl_opt".to_string(),
                r"(?i)attention required!? \|".to_string(),
                r"(?i)g-recaptcha|h-captcha|hcaptcha\.com".to_string(),
                r"(?i)access denied|request blocked".to_string(),
                r"(?i)are you a (?:robot|human)".to_string(),
            ],
            slow_response_ms: 20_000,
            min_body_bytes: 1,
            history_size: 100,
            weights: SignalWeights::default(),
        }
    }
}

/// Retry and backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for the backoff delay.
    pub max_delay_ms: u64,
    /// Backoff multiplier per attempt.
    pub multiplier: f32,
    /// Upper bound for the random jitter added to each retry delay.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            multiplier: 2.0,
            max_jitter_ms: 500,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::invalid("retry.max_attempts", "expected range 1..=10"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect timeout for every request.
    pub connect_timeout_secs: u64,
    /// Total timeout for a single request attempt.
    pub request_timeout_secs: u64,
    /// `Accept-Language` header value.
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            accept_language: "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether successful responses are cached.
    pub enabled: bool,
    /// Time-to-live of a cached response.
    pub ttl_secs: u64,
    /// Maximum number of cached responses before LRU eviction.
    pub capacity: usize,
    /// Interval between background sweeps of expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 600,
            capacity: 256,
            sweep_interval_secs: 60,
        }
    }
}

/// Identifier normalizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Regexes stripped from the name before matching (resolution markers, watermarks, suffixes).
    pub ignore_patterns: Vec<String>,
    /// How many parent directories may be consulted when the file name yields nothing.
    pub max_parent_depth: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![
                r"(?i)\b(?:2160|1440|1080|720|480|360)[pi]\b".to_string(),
                r"(?i)\b(?:4k|8k|uhd|fhd|hd|sd|hevc|x264|x265|h\.?264|h\.?265|aac|60fps)\b"
                    .to_string(),
                r"(?i)\b(?:www\.)?[a-z0-9-]+\.(?:com|net|org|cc|tv|xyz|me|la|club)\b".to_string(),
                r"(?i)[-_. ](?:c|u|ch|uc|sub|subs|subbed|chs|cht|eng|chinese|leak|leaked|uncensored|hack)$"
                    .to_string(),
                r"(?i)[-_. ](?:cd|part|pt|disc)[-_ ]?\d{1,2}$".to_string(),
            ],
            max_parent_depth: 2,
        }
    }
}

/// Completeness scoring weights used by smart-best selection.
///
/// Weights are relative; the score is the share of the total weight whose
/// fields are present, scaled to 0-100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessWeights {
    pub title: u32,
    pub cover: u32,
    pub cast: u32,
    pub tags: u32,
    pub synopsis: u32,
    pub release_date: u32,
    pub runtime: u32,
    pub studio: u32,
    pub score: u32,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            title: 20,
            cover: 20,
            cast: 15,
            tags: 10,
            synopsis: 10,
            release_date: 10,
            runtime: 5,
            studio: 5,
            score: 5,
        }
    }
}

/// Field-category rules for regression comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Compared by existence only.
    pub volatile_fields: Vec<String>,
    /// Compared by URL path only.
    pub url_fields: Vec<String>,
    /// Compared as unordered sets.
    pub set_fields: Vec<String>,
    /// Compared after whitespace normalization, with a similarity fallback.
    pub text_fields: Vec<String>,
    /// Case-fold text fields before comparing.
    pub case_insensitive: bool,
    /// Disables the similarity fallback for text fields.
    pub strict: bool,
    /// Similarity ratio at or above which unequal text still matches (non-strict mode).
    pub similarity_threshold: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            volatile_fields: vec![
                "score".to_string(),
                "view_count".to_string(),
                "comment_count".to_string(),
                "favorite_count".to_string(),
            ],
            url_fields: vec![
                "cover_url".to_string(),
                "thumbnail_url".to_string(),
                "trailer_url".to_string(),
                "source_url".to_string(),
                "sample_images".to_string(),
            ],
            set_fields: vec!["tags".to_string(), "cast".to_string()],
            text_fields: vec!["title".to_string(), "synopsis".to_string()],
            case_insensitive: false,
            strict: false,
            similarity_threshold: 0.9,
        }
    }
}

/// Batch execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Identifiers scraped concurrently per chunk.
    pub concurrency: usize,
    /// Pause between chunks.
    pub chunk_delay_ms: u64,
    /// Deadline for a single adapter invocation.
    pub scrape_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            chunk_delay_ms: 2_000,
            scrape_timeout_secs: 90,
        }
    }
}

impl BatchConfig {
    /// Deadline for a single adapter invocation.
    #[must_use]
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.concurrency) {
            return Err(ConfigError::invalid("batch.concurrency", "expected range 1..=100"));
        }
        if self.scrape_timeout_secs == 0 {
            return Err(ConfigError::invalid("batch.scrape_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

/// Source adapter definitions plus the per-format priority tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// One entry per external site.
    pub definitions: Vec<SourceDefinition>,
    /// Adapter order per identifier format.
    pub priorities: Vec<PriorityRule>,
}

/// Priority order of source names for one identifier format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRule {
    /// Format the order applies to.
    pub format: Format,
    /// Source names, highest priority first.
    pub order: Vec<String>,
}

/// Declarative definition of one external site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Unique source name (also used in baseline file names).
    pub name: String,
    /// Identifier formats this site carries.
    #[serde(default = "default_formats")]
    pub formats: Vec<Format>,
    /// Site-specific extraction settings.
    #[serde(flatten)]
    pub kind: SourceKind,
}

fn default_formats() -> Vec<Format> {
    vec![Format::Standard]
}

/// Extraction style of a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// HTML detail page scraped with a CSS selector table.
    Html(HtmlSourceSettings),
    /// JSON API mapped with JSON pointers.
    Json(JsonSourceSettings),
}

/// Settings for an HTML selector-table source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlSourceSettings {
    /// Detail URL template; see `render_url_template`.
    pub url_template: String,
    /// Markers whose absence in a 2xx page counts as a structural mismatch.
    pub expected_markers: Vec<String>,
    /// Markers that identify a "no such title" page served with status 200.
    pub not_found_markers: Vec<String>,
    /// CSS selector table.
    pub selectors: SelectorTable,
}

/// CSS selectors per record field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorTable {
    pub title: Option<String>,
    pub synopsis: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<String>,
    pub score: Option<String>,
    pub studio: Option<String>,
    pub director: Option<String>,
    pub cast: Option<String>,
    pub tags: Option<String>,
    /// Image element for the cover; the URL is read from `data-src`, `src`, `content` or `href`.
    pub cover: Option<String>,
    pub sample_images: Option<String>,
    pub trailer: Option<String>,
}

/// Settings for a JSON API source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonSourceSettings {
    /// API URL template; see `render_url_template`.
    pub url_template: String,
    /// JSON pointer per record field.
    pub fields: JsonFieldMap,
}

/// JSON pointers (RFC 6901) per record field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFieldMap {
    pub title: Option<String>,
    pub synopsis: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<String>,
    pub score: Option<String>,
    pub studio: Option<String>,
    pub director: Option<String>,
    pub cast: Option<String>,
    pub tags: Option<String>,
    pub cover: Option<String>,
    pub sample_images: Option<String>,
    pub trailer: Option<String>,
}
