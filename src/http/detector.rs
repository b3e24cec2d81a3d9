//! Multi-signal anti-automation detector.
//!
//! Five independent checks run against every response. Each one that fires
//! adds its configured weight to the confidence (clamped to 1.0), and any
//! single firing signal marks the response as blocked:
//!
//! | Signal | Fires when |
//! |--------|------------|
//! | status code | status is in `blocked_statuses` |
//! | header pattern | a configured header matches its regex |
//! | content pattern | the body matches a challenge/captcha regex |
//! | response time | the response took longer than `slow_response_ms` |
//! | structure | a 2xx body is (nearly) empty or misses every expected marker |
//!
//! Detection itself is a pure function of the response and config. A bounded
//! history of outcomes feeds [`AntiBotDetector::detection_rate`] for
//! visibility only.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace};

use super::FetchResponse;
use crate::config::{ConfigError, DetectionConfig, SignalWeights};

/// One detection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    StatusCode,
    HeaderPattern,
    ContentPattern,
    ResponseTime,
    Structure,
}

/// Outcome of running the detector on one response.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// True when any signal fired.
    pub is_blocked: bool,
    /// Sum of fired signal weights, clamped to 1.0.
    pub confidence: f64,
    /// Signals that fired, in check order.
    pub signals: Vec<Signal>,
}

impl DetectionResult {
    /// Whether `signal` fired.
    #[must_use]
    pub fn has(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

#[derive(Debug)]
struct HeaderMatcher {
    name: String,
    pattern: Regex,
}

/// Anti-automation detector with compiled patterns.
#[derive(Debug)]
pub struct AntiBotDetector {
    blocked_statuses: Vec<u16>,
    header_rules: Vec<HeaderMatcher>,
    body_patterns: Vec<Regex>,
    slow_response: Duration,
    min_body_bytes: usize,
    weights: SignalWeights,
    history_size: usize,
    history: Mutex<VecDeque<bool>>,
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl AntiBotDetector {
    /// Compiles the configured header and body patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pattern`] when a pattern does not compile.
    pub fn new(config: &DetectionConfig) -> Result<Self, ConfigError> {
        let header_rules = config
            .header_patterns
            .iter()
            .map(|rule| {
                Ok(HeaderMatcher {
                    name: rule.name.to_ascii_lowercase(),
                    pattern: compile(&rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let body_patterns = config
            .body_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            blocked_statuses: config.blocked_statuses.clone(),
            header_rules,
            body_patterns,
            slow_response: Duration::from_millis(config.slow_response_ms),
            min_body_bytes: config.min_body_bytes,
            weights: config.weights,
            history_size: config.history_size.max(1),
            history: Mutex::new(VecDeque::new()),
        })
    }

    /// Runs every check against `response`.
    pub fn detect(&self, response: &FetchResponse) -> DetectionResult {
        self.detect_with_markers(response, &[])
    }

    /// Runs every check; a 2xx body missing all of `expected_markers` fires the structure signal.
    pub fn detect_with_markers(
        &self,
        response: &FetchResponse,
        expected_markers: &[String],
    ) -> DetectionResult {
        let mut signals = Vec::new();
        let mut confidence = 0.0;
        let mut fire = |signal: Signal, weight: f64| {
            signals.push(signal);
            confidence += weight;
        };

        if self.blocked_statuses.contains(&response.status) {
            fire(Signal::StatusCode, self.weights.status_code);
        }

        let header_hit = self.header_rules.iter().any(|rule| {
            response
                .headers
                .get_all(rule.name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| rule.pattern.is_match(value))
        });
        if header_hit {
            fire(Signal::HeaderPattern, self.weights.header_pattern);
        }

        if self.body_patterns.iter().any(|p| p.is_match(&response.body)) {
            fire(Signal::ContentPattern, self.weights.content_pattern);
        }

        if response.elapsed > self.slow_response {
            fire(Signal::ResponseTime, self.weights.response_time);
        }

        if response.is_success() && self.structure_mismatch(&response.body, expected_markers) {
            fire(Signal::Structure, self.weights.structure);
        }

        let result = DetectionResult {
            is_blocked: !signals.is_empty(),
            confidence: confidence.min(1.0),
            signals,
        };
        self.remember(result.is_blocked);

        if result.is_blocked {
            debug!(
                url = %response.url,
                status = response.status,
                confidence = result.confidence,
                signals = ?result.signals,
                "anti-automation signals detected"
            );
        } else {
            trace!(url = %response.url, "no anti-automation signals");
        }
        result
    }

    fn structure_mismatch(&self, body: &str, expected_markers: &[String]) -> bool {
        if body.trim().len() < self.min_body_bytes {
            return true;
        }
        !expected_markers.is_empty() && !expected_markers.iter().any(|m| body.contains(m.as_str()))
    }

    fn remember(&self, blocked: bool) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(blocked);
        while history.len() > self.history_size {
            history.pop_front();
        }
    }

    /// Share of blocked results among the most recent detections (0.0 when none).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn detection_rate(&self) -> f64 {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.is_empty() {
            return 0.0;
        }
        history.iter().filter(|b| **b).count() as f64 / history.len() as f64
    }
}
