//! Resilient HTTP client: one logical fetch over many physical attempts.
//!
//! Every attempt goes through the same pipeline:
//!
//! 1. rate limiter admission (a denial fails the fetch immediately)
//! 2. proxy selection when the pool is enabled
//! 3. the request itself, with a rotated User-Agent and a hard timeout
//! 4. status classification into a [`CrawlerError`]
//! 5. anti-automation detection on 2xx bodies
//!
//! Proxy and rate limiter bookkeeping is updated after each attempt. Failures
//! are retried per [`RetryPolicy`]; a server `Retry-After` replaces the
//! computed backoff. Blocks are only retried when a proxy pool can rotate the
//! exit; without one they end the fetch.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Proxy};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::cache::{ResponseCache, TtlLruCache, spawn_sweeper};
use super::detector::AntiBotDetector;
use super::encoding::decode_body;
use super::error::CrawlerError;
use super::proxy::{HttpProxyProbe, ProxyEntry, ProxyManager, ProxyProbe};
use super::rate_limiter::{Admission, RateLimiter, parse_retry_after};
use super::response::FetchResponse;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::config::{ConfigError, EngineConfig, HttpConfig};
use crate::events::{EngineEvent, EventBus};
use crate::user_agent::UserAgentPool;

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Per-fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Rate limiter queue priority (higher is admitted first).
    pub priority: i32,
    /// Preferred proxy region.
    pub region: Option<String>,
    /// Markers a genuine 2xx page contains; a body with none of them is treated as blocked.
    pub expected_markers: Vec<String>,
    /// Whether the response cache may serve and store this fetch.
    pub use_cache: bool,
    /// `Accept` header override.
    pub accept: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            region: None,
            expected_markers: Vec::new(),
            use_cache: true,
            accept: None,
        }
    }
}

impl FetchOptions {
    /// Sets the queue priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the expected page markers.
    #[must_use]
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.expected_markers = markers;
        self
    }

    /// Sets the `Accept` header.
    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// HTTP client composed of rate limiter, proxy pool, detector, retry policy and cache.
///
/// Cheap to share behind an `Arc`; all components use interior synchronization.
pub struct ResilientClient {
    limiter: Arc<RateLimiter>,
    proxies: Arc<ProxyManager>,
    detector: Arc<AntiBotDetector>,
    retry: RetryPolicy,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_sweep: Duration,
    user_agents: UserAgentPool,
    http: HttpConfig,
    direct: Client,
    proxied: DashMap<String, Client>,
    probe: Arc<dyn ProxyProbe>,
    events: EventBus,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("limiter", &self.limiter)
            .field("proxies", &self.proxies)
            .field("retry", &self.retry)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Builds every component from `config`, publishing state changes on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a detector pattern, proxy entry or the
    /// HTTP transport cannot be built.
    pub fn from_config(config: &EngineConfig, events: EventBus) -> Result<Self, ConfigError> {
        let limiter = if config.rate_limit.enabled {
            RateLimiter::new(&config.rate_limit, events.clone())
        } else {
            RateLimiter::disabled()
        };
        let proxies = ProxyManager::new(&config.proxy, events.clone())?;
        let detector = AntiBotDetector::new(&config.detection)?;
        let cache: Option<Arc<dyn ResponseCache>> = config
            .cache
            .enabled
            .then(|| Arc::new(TtlLruCache::from_config(&config.cache)) as Arc<dyn ResponseCache>);
        let direct = build_http_client(&config.http, None)
            .map_err(|source| ConfigError::HttpClient { source })?;

        Ok(Self {
            limiter: Arc::new(limiter),
            proxies: Arc::new(proxies),
            detector: Arc::new(detector),
            retry: RetryPolicy::from_config(&config.retry),
            cache,
            cache_sweep: Duration::from_secs(config.cache.sweep_interval_secs),
            user_agents: UserAgentPool::default(),
            http: config.http.clone(),
            direct,
            proxied: DashMap::new(),
            probe: Arc::new(HttpProxyProbe::from_config(&config.proxy)),
            events,
        })
    }

    /// Replaces the response cache (or disables caching with `None`).
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<dyn ResponseCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the proxy health probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ProxyProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the User-Agent pool.
    #[must_use]
    pub fn with_user_agents(mut self, pool: UserAgentPool) -> Self {
        self.user_agents = pool;
        self
    }

    /// The shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The shared proxy pool.
    #[must_use]
    pub fn proxy_manager(&self) -> &Arc<ProxyManager> {
        &self.proxies
    }

    /// The anti-automation detector.
    #[must_use]
    pub fn detector(&self) -> &AntiBotDetector {
        &self.detector
    }

    /// The event bus components publish on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Starts the adaptive rate loop, the cache sweeper and, with an enabled
    /// pool, proxy health checks.
    ///
    /// Tasks stop on their own once the client is dropped.
    #[must_use]
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if !self.limiter.is_disabled() {
            handles.push(self.limiter.spawn_adaptive_loop());
        }
        if let Some(cache) = &self.cache {
            handles.push(spawn_sweeper(cache, self.cache_sweep));
        }
        if self.proxies.is_enabled() {
            handles.push(self.proxies.spawn_health_checks(Arc::clone(&self.probe)));
        }
        handles
    }

    /// Fetches `url`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`CrawlerError`], or the last one once retries run out.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse, CrawlerError> {
        if options.use_cache {
            if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.get(url)) {
                debug!("served from cache");
                return Ok(hit);
            }
        }

        let mut attempt = 1;
        let mut last_proxy: Option<String> = None;
        loop {
            let error = match self.attempt(url, options, &mut last_proxy).await {
                Ok(response) => {
                    if options.use_cache {
                        if let Some(cache) = &self.cache {
                            cache.put(url, response.clone());
                        }
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            match self.retry.should_retry(self.failure_type(&error), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    let delay = retry_after(&error).unwrap_or(delay);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, %reason, "giving up");
                    return Err(error);
                }
            }
        }
    }

    fn failure_type(&self, error: &CrawlerError) -> FailureType {
        match classify_error(error) {
            FailureType::Blocked if !self.proxies.is_enabled() => FailureType::Terminal,
            FailureType::Blocked => FailureType::Transient,
            other => other,
        }
    }

    /// One request. `last_proxy` holds the exit of the previous attempt, which
    /// is avoided while another active proxy exists, and is updated to this one.
    async fn attempt(
        &self,
        url: &str,
        options: &FetchOptions,
        last_proxy: &mut Option<String>,
    ) -> Result<FetchResponse, CrawlerError> {
        if let Admission::Denied(reason) = self.limiter.acquire(options.priority).await {
            debug!(%reason, "admission denied");
            return Err(CrawlerError::rate_limited(url, reason));
        }

        let proxy = if self.proxies.is_enabled() {
            let selected = self
                .proxies
                .select_excluding(options.region.as_deref(), last_proxy.as_deref())
                .ok_or_else(|| CrawlerError::proxy_exhausted(url))?;
            if last_proxy.is_some() {
                debug!(from = ?last_proxy, to = %selected, "rotating proxy");
            }
            Some(selected)
        } else {
            None
        };
        let proxy_id = proxy.as_ref().map(ProxyEntry::id);
        last_proxy.clone_from(&proxy_id);
        let client = self.client_for(url, proxy.as_ref())?;

        let started = Instant::now();
        let timeout = Duration::from_secs(self.http.request_timeout_secs);
        let sent = match tokio::time::timeout(timeout, self.send(&client, url, options)).await {
            Ok(result) => result,
            Err(_) => Err(CrawlerError::timeout(url)),
        };
        let elapsed = started.elapsed();

        let mut response = match sent {
            Ok(response) => response.with_elapsed(elapsed),
            Err(error) => {
                self.record(proxy_id.as_deref(), false, elapsed);
                return Err(error);
            }
        };
        response.proxy.clone_from(&proxy_id);

        if !response.is_success() {
            let retry_after = response.header("retry-after").map(str::to_string);
            let mut error = CrawlerError::from_status(url, response.status, retry_after);
            if let CrawlerError::SiteBlocked { confidence, .. } = &mut error {
                *confidence = self.detector.detect(&response).confidence;
                self.events.emit(EngineEvent::BlockDetected {
                    url: url.to_string(),
                    confidence: *confidence,
                });
            }
            // A definitive answer from the site means the exit worked.
            let exit_ok = matches!(
                error,
                CrawlerError::MovieNotFound { .. } | CrawlerError::SitePermission { .. }
            ) || response.status == 401;
            self.record(proxy_id.as_deref(), exit_ok, elapsed);
            return Err(error);
        }

        let detection = self
            .detector
            .detect_with_markers(&response, &options.expected_markers);
        if detection.is_blocked {
            info!(
                confidence = detection.confidence,
                signals = ?detection.signals,
                proxy = ?proxy_id,
                "2xx response classified as blocked"
            );
            self.events.emit(EngineEvent::BlockDetected {
                url: url.to_string(),
                confidence: detection.confidence,
            });
            self.record(proxy_id.as_deref(), false, elapsed);
            return Err(CrawlerError::blocked(url, response.status, detection.confidence));
        }

        self.record(proxy_id.as_deref(), true, elapsed);
        Ok(response)
    }

    async fn send(&self, client: &Client, url: &str, options: &FetchOptions) -> Result<FetchResponse, CrawlerError> {
        let accept = options.accept.as_deref().unwrap_or(DEFAULT_ACCEPT);
        let response = client
            .get(url)
            .header(USER_AGENT, self.user_agents.pick())
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, self.http.accept_language.as_str())
            .send()
            .await
            .map_err(|error| transport_error(url, &error))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| transport_error(url, &error))?;
        let (body, encoding) = decode_body(&bytes, content_type.as_deref());

        let mut decoded = FetchResponse::new(final_url, status, body);
        decoded.headers = headers;
        decoded.charset = encoding.name();
        Ok(decoded)
    }

    fn record(&self, proxy_id: Option<&str>, success: bool, elapsed: Duration) {
        self.limiter.record_outcome(success, elapsed);
        if let Some(id) = proxy_id {
            if success {
                self.proxies.report_success(id, elapsed);
            } else {
                self.proxies.report_failure(id);
            }
        }
    }

    fn client_for(&self, url: &str, proxy: Option<&ProxyEntry>) -> Result<Client, CrawlerError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let id = proxy.id();
        if let Some(client) = self.proxied.get(&id) {
            return Ok(client.clone());
        }
        let client = build_http_client(&self.http, Some(proxy))
            .map_err(|error| CrawlerError::other(url, format!("cannot route through {id}: {error}")))?;
        self.proxied.insert(id, client.clone());
        Ok(client)
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> CrawlerError {
    if error.is_timeout() {
        CrawlerError::timeout(url)
    } else {
        CrawlerError::transport(url, error.to_string())
    }
}

fn retry_after(error: &CrawlerError) -> Option<Duration> {
    match error {
        CrawlerError::WebsiteError {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Builds a transport client; `proxy` routes every request through that entry.
///
/// Direct clients ignore environment proxy variables: routing is the proxy pool's job.
fn build_http_client(http: &HttpConfig, proxy: Option<&ProxyEntry>) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .timeout(Duration::from_secs(http.request_timeout_secs))
        .gzip(true)
        .cookie_store(true);
    let builder = match proxy {
        Some(entry) => builder.proxy(Proxy::all(entry.url())?),
        None => builder.no_proxy(),
    };
    builder.build()
}
