//! Token-bucket admission control with an adaptive refill rate.
//!
//! [`RateLimiter`] gates every outbound request:
//!
//! - A bucket of `burst` tokens refills continuously at `requests_per_second`.
//! - [`RateLimiter::try_acquire`] never waits: it grants when a token is
//!   available and nobody is queued, otherwise it denies.
//! - [`RateLimiter::acquire`] queues callers by priority (higher first, FIFO
//!   within a priority) up to `max_queue`, and gives up after `max_wait`.
//! - Consecutive denials trip a cooldown window during which every admission
//!   is denied.
//! - [`RateLimiter::adjust`] (run periodically by
//!   [`RateLimiter::spawn_adaptive_loop`]) halves the refill rate when the
//!   windowed error rate is high and raises it when errors and rejections are
//!   both low, always within `[min_rate, max_rate]`.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! `.await`.
//!
//! # Example
//!
//! ```
//! use metascraper_core::http::{Admission, RateLimiter};
//! use metascraper_core::config::RateLimitConfig;
//! use metascraper_core::events::EventBus;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(&RateLimitConfig::default(), EventBus::default());
//! if limiter.acquire(0).await == Admission::Granted {
//!     // send the request, then report how it went
//!     limiter.record_outcome(true, std::time::Duration::from_millis(120));
//! }
//! # }
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::RateLimitConfig;
use crate::events::{EngineEvent, EventBus};

/// Maximum Retry-After value honored (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Shortest sleep between admission re-checks of a queued caller.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Growth factor applied when the adaptive loop raises the rate.
const GROWTH_FACTOR: f64 = 1.2;

/// Why an admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No token available right now (non-queuing admission only).
    Exhausted,
    /// The wait queue is at `max_queue`.
    QueueFull,
    /// Waited longer than `max_wait`.
    WaitTimeout,
    /// The limiter is in a cooldown window.
    Cooldown,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Exhausted => "no token available",
            Self::QueueFull => "admission queue is full",
            Self::WaitTimeout => "waited too long for a token",
            Self::Cooldown => "cooling down after repeated denials",
        };
        f.write_str(text)
    }
}

/// Result of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// One token was consumed; the caller may send.
    Granted,
    /// No token was consumed.
    Denied(DenyReason),
}

impl Admission {
    /// Returns true when the admission was granted.
    #[must_use]
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    /// Tokens currently in the bucket.
    pub tokens: f64,
    /// Bucket capacity.
    pub capacity: f64,
    /// Current refill rate (tokens/second).
    pub refill_rate: f64,
    /// Callers waiting in `acquire`.
    pub queue_len: usize,
    /// Whether a cooldown window is active.
    pub in_cooldown: bool,
    /// Share of failed outcomes in the window (0.0 when there are none).
    pub error_rate: f64,
    /// Share of denied admissions in the window (0.0 when there are none).
    pub rejection_rate: f64,
    /// Mean latency of outcomes in the window.
    pub mean_latency: Option<Duration>,
    /// Number of outcomes in the window.
    pub samples: usize,
}

type WaiterKey = (Reverse<i32>, u64);

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    success: bool,
    latency: Duration,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    waiters: BTreeSet<WaiterKey>,
    next_seq: u64,
    consecutive_denials: u32,
    cooldown_until: Option<Instant>,
    outcomes: VecDeque<Outcome>,
    admissions: VecDeque<(Instant, bool)>,
}

/// Token-bucket rate limiter shared by every fetch.
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` to share it across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    enabled: bool,
    state: Mutex<BucketState>,
    events: EventBus,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    #[must_use]
    pub fn new(config: &RateLimitConfig, events: EventBus) -> Self {
        let capacity = config.burst.max(1.0);
        Self {
            config: config.clone(),
            enabled: config.enabled,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refill_rate: config.requests_per_second.max(f64::MIN_POSITIVE),
                last_refill: Instant::now(),
                waiters: BTreeSet::new(),
                next_seq: 0,
                consecutive_denials: 0,
                cooldown_until: None,
                outcomes: VecDeque::new(),
                admissions: VecDeque::new(),
            }),
            events,
        }
    }

    /// Creates a limiter that grants every admission immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            &RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            EventBus::default(),
        )
    }

    /// Returns true if admission control is off.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        !self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capacity(&self) -> f64 {
        self.config.burst.max(1.0)
    }

    /// Non-queuing admission: grants only if a token is available and nobody is waiting.
    #[instrument(skip(self))]
    pub fn try_acquire(&self) -> Admission {
        if !self.enabled {
            return Admission::Granted;
        }
        let now = Instant::now();
        let mut state = self.lock();
        self.refill(&mut state, now);

        if self.in_cooldown(&mut state, now) {
            return self.deny(&mut state, now, DenyReason::Cooldown);
        }
        if state.waiters.is_empty() && state.tokens >= 1.0 {
            Self::grant(&mut state, now);
            return Admission::Granted;
        }
        self.deny(&mut state, now, DenyReason::Exhausted)
    }

    /// Queuing admission: waits (by priority, then arrival) for a token up to `max_wait`.
    ///
    /// Dropping the returned future before it completes removes the caller from the queue.
    #[instrument(skip(self))]
    pub async fn acquire(&self, priority: i32) -> Admission {
        if !self.enabled {
            return Admission::Granted;
        }
        let start = Instant::now();
        let deadline = start + self.config.max_wait();

        let key = {
            let mut state = self.lock();
            self.refill(&mut state, start);
            if self.in_cooldown(&mut state, start) {
                return self.deny(&mut state, start, DenyReason::Cooldown);
            }
            if state.waiters.is_empty() && state.tokens >= 1.0 {
                Self::grant(&mut state, start);
                return Admission::Granted;
            }
            if state.waiters.len() >= self.config.max_queue {
                debug!(queue_len = state.waiters.len(), "admission queue full");
                return self.deny(&mut state, start, DenyReason::QueueFull);
            }
            let key = (Reverse(priority), state.next_seq);
            state.next_seq += 1;
            state.waiters.insert(key);
            key
        };
        let _guard = WaiterGuard { limiter: self, key };

        loop {
            let sleep_for = {
                let now = Instant::now();
                let mut state = self.lock();
                self.refill(&mut state, now);

                if self.in_cooldown(&mut state, now) {
                    state.waiters.remove(&key);
                    return self.deny(&mut state, now, DenyReason::Cooldown);
                }
                let is_head = state.waiters.first() == Some(&key);
                if is_head && state.tokens >= 1.0 {
                    state.waiters.remove(&key);
                    Self::grant(&mut state, now);
                    debug!(
                        waited_ms = now.duration_since(start).as_millis(),
                        "queued admission granted"
                    );
                    return Admission::Granted;
                }
                if now >= deadline {
                    state.waiters.remove(&key);
                    return self.deny(&mut state, now, DenyReason::WaitTimeout);
                }
                let deficit = (1.0 - state.tokens).max(0.0);
                let until_token = Duration::from_secs_f64(deficit / state.refill_rate);
                until_token.max(MIN_POLL).min(deadline - now)
            };
            tokio::time::sleep(sleep_for).await;
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * state.refill_rate).min(self.capacity());
        state.last_refill = now;
    }

    /// Returns true while a cooldown is active; ends an expired one.
    fn in_cooldown(&self, state: &mut BucketState, now: Instant) -> bool {
        match state.cooldown_until {
            Some(until) if now < until => true,
            Some(_) => {
                state.cooldown_until = None;
                state.consecutive_denials = 0;
                info!("rate limiter cooldown ended");
                self.events.emit(EngineEvent::CooldownEnded);
                false
            }
            None => false,
        }
    }

    fn grant(state: &mut BucketState, now: Instant) {
        state.tokens -= 1.0;
        state.consecutive_denials = 0;
        state.admissions.push_back((now, true));
    }

    fn deny(&self, state: &mut BucketState, now: Instant, reason: DenyReason) -> Admission {
        state.admissions.push_back((now, false));
        if reason != DenyReason::Cooldown {
            state.consecutive_denials += 1;
            let threshold = self.config.cooldown_after_denials;
            if threshold > 0 && state.consecutive_denials >= threshold {
                let duration = self.config.cooldown();
                state.cooldown_until = Some(now + duration);
                warn!(
                    consecutive_denials = state.consecutive_denials,
                    cooldown_ms = duration.as_millis(),
                    "too many denials, entering cooldown"
                );
                self.events.emit(EngineEvent::CooldownStarted { duration });
            }
        }
        debug!(%reason, "admission denied");
        Admission::Denied(reason)
    }

    /// Records the outcome of a request sent under a granted admission.
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        state.outcomes.push_back(Outcome {
            at: now,
            success,
            latency,
        });
        self.prune(&mut state, now);
    }

    fn prune(&self, state: &mut BucketState, now: Instant) {
        let window = Duration::from_secs(self.config.adaptive.window_secs);
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while state.outcomes.front().is_some_and(|o| o.at < cutoff) {
            state.outcomes.pop_front();
        }
        while state.admissions.front().is_some_and(|(at, _)| *at < cutoff) {
            state.admissions.pop_front();
        }
    }

    /// Current statistics over the trailing window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut state = self.lock();
        self.refill(&mut state, now);
        self.prune(&mut state, now);

        let samples = state.outcomes.len();
        let failures = state.outcomes.iter().filter(|o| !o.success).count();
        let denied = state.admissions.iter().filter(|(_, granted)| !granted).count();
        let mean_latency = (samples > 0).then(|| {
            let total: Duration = state.outcomes.iter().map(|o| o.latency).sum();
            total / u32::try_from(samples).unwrap_or(u32::MAX)
        });

        RateLimiterStats {
            tokens: state.tokens,
            capacity: self.capacity(),
            refill_rate: state.refill_rate,
            queue_len: state.waiters.len(),
            in_cooldown: state.cooldown_until.is_some_and(|until| now < until),
            error_rate: ratio(failures, samples),
            rejection_rate: ratio(denied, state.admissions.len()),
            mean_latency,
            samples,
        }
    }

    /// Current refill rate (tokens/second).
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        self.lock().refill_rate
    }

    /// One step of the adaptive control loop.
    ///
    /// Returns the new refill rate when it changed.
    #[instrument(skip(self))]
    pub fn adjust(&self) -> Option<f64> {
        let adaptive = &self.config.adaptive;
        if !self.enabled || !adaptive.enabled {
            return None;
        }
        let stats = self.stats();
        if stats.samples < adaptive.min_samples {
            debug!(samples = stats.samples, "not enough samples to adjust rate");
            return None;
        }

        let current = stats.refill_rate;
        let target = if stats.error_rate > adaptive.error_threshold {
            (current / 2.0).max(adaptive.min_rate)
        } else if stats.error_rate < adaptive.low_error_rate
            && stats.rejection_rate < adaptive.low_rejection_rate
        {
            (current * GROWTH_FACTOR).min(adaptive.max_rate)
        } else {
            current
        };

        if (target - current).abs() < f64::EPSILON {
            return None;
        }

        {
            let now = Instant::now();
            let mut state = self.lock();
            self.refill(&mut state, now);
            state.refill_rate = target;
        }
        info!(
            from = current,
            to = target,
            error_rate = stats.error_rate,
            rejection_rate = stats.rejection_rate,
            "refill rate adjusted"
        );
        self.events.emit(EngineEvent::RateAdjusted {
            from: current,
            to: target,
            error_rate: stats.error_rate,
        });
        Some(target)
    }

    /// Runs [`adjust`](Self::adjust) every `adaptive.interval_secs` until the limiter is dropped.
    #[must_use]
    pub fn spawn_adaptive_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.adaptive.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                limiter.adjust();
            }
        })
    }
}

/// Removes a queued caller when its `acquire` future completes or is dropped.
struct WaiterGuard<'a> {
    limiter: &'a RateLimiter,
    key: WaiterKey,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.limiter.lock().waiters.remove(&self.key);
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-dates (RFC 7231). Returns `None` when the
/// value cannot be parsed; caps excessive values at one hour.
///
/// ```
/// use std::time::Duration;
/// use metascraper_core::http::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let wait = datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if wait > MAX_RETRY_AFTER {
            warn!(
                delay_secs = wait.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
        }
        Some(wait.min(MAX_RETRY_AFTER))
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(burst: f64, rate: f64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: rate,
            burst,
            ..RateLimitConfig::default()
        }
    }

    fn limiter(burst: f64, rate: f64) -> RateLimiter {
        RateLimiter::new(&config(burst, rate), EventBus::default())
    }

    // ==================== Token Bucket Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_denial_then_refill() {
        let limiter = limiter(5.0, 1.0);

        for i in 0..5 {
            assert_eq!(limiter.try_acquire(), Admission::Granted, "admission {i}");
        }
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied(DenyReason::Exhausted)
        );

        // Half a token has refilled: still not enough.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied(DenyReason::Exhausted)
        );
        assert!((limiter.stats().tokens - 0.5).abs() < 1e-9);

        // One second after the burst a whole token is back.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.try_acquire(), Admission::Granted);
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied(DenyReason::Exhausted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_stay_within_bounds() {
        let limiter = limiter(3.0, 2.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        let stats = limiter.stats();
        assert!((stats.tokens - 3.0).abs() < f64::EPSILON);

        for _ in 0..10 {
            let _ = limiter.try_acquire();
            let tokens = limiter.stats().tokens;
            assert!((0.0..=3.0).contains(&tokens), "tokens out of bounds: {tokens}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_always_grants() {
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        for _ in 0..100 {
            assert!(limiter.try_acquire().is_granted());
            assert!(limiter.acquire(0).await.is_granted());
        }
    }

    // ==================== Queue Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = limiter(1.0, 1.0);
        assert!(limiter.acquire(0).await.is_granted());

        let start = Instant::now();
        assert!(limiter.acquire(0).await.is_granted());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(990), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_priority_is_served_first() {
        let limiter = Arc::new(limiter(1.0, 1.0));
        assert!(limiter.try_acquire().is_granted());

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (name, priority) in [("low", 0), ("high", 10)] {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                assert!(limiter.acquire(priority).await.is_granted());
                order.lock().unwrap().push(name);
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_denies_immediately() {
        let limiter = Arc::new(RateLimiter::new(
            &RateLimitConfig {
                max_queue: 1,
                ..config(1.0, 0.5)
            },
            EventBus::default(),
        ));
        assert!(limiter.try_acquire().is_granted());

        let queued = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(0).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.stats().queue_len, 1);

        assert_eq!(
            limiter.acquire(0).await,
            Admission::Denied(DenyReason::QueueFull)
        );
        assert!(queued.await.unwrap().is_granted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_denies() {
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                max_wait_ms: 2_000,
                ..config(1.0, 0.1)
            },
            EventBus::default(),
        );
        assert!(limiter.try_acquire().is_granted());

        let start = Instant::now();
        assert_eq!(
            limiter.acquire(0).await,
            Admission::Denied(DenyReason::WaitTimeout)
        );
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(limiter.stats().queue_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquire_leaves_queue() {
        let limiter = limiter(1.0, 0.1);
        assert!(limiter.try_acquire().is_granted());

        let result = tokio::time::timeout(Duration::from_millis(100), limiter.acquire(0)).await;
        assert!(result.is_err());
        assert_eq!(limiter.stats().queue_len, 0);
    }

    // ==================== Cooldown Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_denials_trigger_cooldown() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                cooldown_after_denials: 3,
                cooldown_ms: 10_000,
                ..config(1.0, 0.01)
            },
            events,
        );
        assert!(limiter.try_acquire().is_granted());
        for _ in 0..3 {
            assert_eq!(
                limiter.try_acquire(),
                Admission::Denied(DenyReason::Exhausted)
            );
        }
        assert!(limiter.stats().in_cooldown);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::CooldownStarted { .. }
        ));

        // Even with tokens available, the cooldown denies.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            limiter.try_acquire(),
            Admission::Denied(DenyReason::Cooldown)
        );

        // After the window (and enough refill) admission resumes.
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(limiter.try_acquire().is_granted());
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::CooldownEnded);
    }

    // ==================== Adaptive Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_adjust_halves_rate_on_errors() {
        let limiter = limiter(5.0, 4.0);
        for _ in 0..10 {
            limiter.record_outcome(false, Duration::from_millis(50));
        }
        assert_eq!(limiter.adjust(), Some(2.0));
        assert!((limiter.refill_rate() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_respects_min_rate() {
        let limiter = limiter(5.0, 0.15);
        for _ in 0..10 {
            limiter.record_outcome(false, Duration::from_millis(50));
        }
        assert_eq!(limiter.adjust(), Some(0.1));
        assert_eq!(limiter.adjust(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_grows_rate_when_healthy() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let limiter = RateLimiter::new(&config(5.0, 2.0), events);
        for _ in 0..10 {
            limiter.record_outcome(true, Duration::from_millis(50));
        }
        let new_rate = limiter.adjust().unwrap();
        assert!((new_rate - 2.4).abs() < 1e-9);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::RateAdjusted { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_needs_minimum_samples() {
        let limiter = limiter(5.0, 2.0);
        limiter.record_outcome(false, Duration::from_millis(50));
        assert_eq!(limiter.adjust(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_drops_old_outcomes() {
        let limiter = limiter(5.0, 2.0);
        for _ in 0..10 {
            limiter.record_outcome(false, Duration::from_millis(10));
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        let stats = limiter.stats();
        assert_eq!(stats.samples, 0);
        assert!(stats.error_rate.abs() < f64::EPSILON);
        assert_eq!(stats.mean_latency, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_loop_runs_periodically() {
        let limiter = Arc::new(limiter(5.0, 4.0));
        for _ in 0..10 {
            limiter.record_outcome(false, Duration::from_millis(50));
        }
        let handle = limiter.spawn_adaptive_loop();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(limiter.refill_rate() < 4.0);
        handle.abort();
    }

    // ==================== Retry-After Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative_and_invalid() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("86400"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
