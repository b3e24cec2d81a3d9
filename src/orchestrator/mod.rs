//! Scraper orchestrator.
//!
//! Given an [`Identifier`], the orchestrator asks the eligible source adapters
//! (in registry priority order) for a [`Record`] using one of four strategies:
//!
//! - [`Strategy::FallbackChain`] - one adapter at a time, first success wins
//! - [`Strategy::ParallelRace`] - all at once, first success wins, the rest are dropped
//! - [`Strategy::MergeAll`] - all at once, every success folded with [`Record::merge`]
//!   in priority order
//! - [`Strategy::SmartBest`] - all at once, highest completeness score wins
//!
//! Every adapter call runs under its own [`ScrapeRequest`] deadline; a call
//! that overruns is abandoned and recorded as a timeout. A scrape only fails
//! when no adapter succeeded, and the error then lists every adapter failure.
//!
//! [`Orchestrator::scrape_batch`] runs many identifiers in fixed-size chunks
//! with a pause between chunks, collecting per-item outcomes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{BatchConfig, CompletenessWeights, EngineConfig};
use crate::http::CrawlerError;
use crate::identifier::{Format, Identifier};
use crate::record::Record;
use crate::source::{ScrapeRequest, SourceAdapter, SourceRegistry};

/// How eligible adapters are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Try adapters in priority order; first success wins.
    #[default]
    FallbackChain,
    /// Run all adapters concurrently; first success wins.
    ParallelRace,
    /// Run all adapters concurrently; merge every success in priority order.
    MergeAll,
    /// Run all adapters concurrently; keep the most complete success.
    SmartBest,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FallbackChain => "fallback-chain",
            Self::ParallelRace => "parallel-race",
            Self::MergeAll => "merge-all",
            Self::SmartBest => "smart-best",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('_', "-").as_str() {
            "fallback-chain" | "fallback" => Ok(Self::FallbackChain),
            "parallel-race" | "race" => Ok(Self::ParallelRace),
            "merge-all" | "merge" => Ok(Self::MergeAll),
            "smart-best" | "best" => Ok(Self::SmartBest),
            other => Err(format!(
                "unknown strategy '{other}' (expected fallback-chain, parallel-race, merge-all or smart-best)"
            )),
        }
    }
}

/// One adapter's failure, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    /// Adapter name.
    pub source: String,
    /// What went wrong.
    pub error: CrawlerError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First line only; suggestions are for single-error output.
        let message = self.error.to_string();
        let first = message.lines().next().unwrap_or_default();
        write!(f, "{}: {first}", self.source)
    }
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from a whole scrape.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// No registered adapter supports the identifier's format.
    #[error(
        "no source supports {identifier} (format {format})\n  Suggestion: Add a source for this format under sources.definitions"
    )]
    NoEligibleSource {
        /// Normalized identifier.
        identifier: String,
        /// Its format.
        format: Format,
    },

    /// Every eligible adapter failed.
    #[error("all sources failed for {identifier}: {}", summarize(.failures))]
    AllSourcesFailed {
        /// Normalized identifier.
        identifier: String,
        /// One entry per adapter, in the order they were tried or completed.
        failures: Vec<SourceFailure>,
    },
}

/// Successful scrape: the record plus any adapter failures seen on the way.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    /// Selected or merged record.
    pub record: Record,
    /// Adapters that failed (non-fatal).
    pub failures: Vec<SourceFailure>,
}

/// Result of one identifier within a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// Identifier that was scraped.
    pub identifier: Identifier,
    /// Its outcome.
    pub result: Result<ScrapeOutcome, OrchestratorError>,
}

/// Per-item results of [`Orchestrator::scrape_batch`], in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per identifier.
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    /// Number of identifiers that produced a record.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    /// Number of identifiers that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Whether every identifier produced a record.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs scrape strategies over a [`SourceRegistry`].
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    weights: CompletenessWeights,
    batch: BatchConfig,
    priority: i32,
}

impl Orchestrator {
    /// Creates an orchestrator with default scoring and batch settings.
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            weights: CompletenessWeights::default(),
            batch: BatchConfig::default(),
            priority: 0,
        }
    }

    /// Creates an orchestrator using the `scoring` and `batch` config sections.
    #[must_use]
    pub fn from_config(registry: Arc<SourceRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            weights: config.scoring,
            batch: config.batch.clone(),
            priority: 0,
        }
    }

    /// Overrides the batch settings.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Sets the rate limiter priority of every request this orchestrator makes.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The adapter registry.
    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Scrapes one identifier with `strategy`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NoEligibleSource`] when no adapter supports the
    /// identifier, [`OrchestratorError::AllSourcesFailed`] when none succeeded.
    #[instrument(skip(self, identifier), fields(id = %identifier, %strategy))]
    pub async fn scrape(
        &self,
        identifier: &Identifier,
        strategy: Strategy,
    ) -> Result<ScrapeOutcome, OrchestratorError> {
        let adapters = self.registry.eligible(identifier);
        if adapters.is_empty() {
            return Err(OrchestratorError::NoEligibleSource {
                identifier: identifier.normalized().to_string(),
                format: identifier.format(),
            });
        }
        debug!(
            sources = ?adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "eligible sources"
        );

        let outcome = match strategy {
            Strategy::FallbackChain => self.fallback_chain(identifier, &adapters).await,
            Strategy::ParallelRace => self.parallel_race(identifier, &adapters).await,
            Strategy::MergeAll => self.merge_all(identifier, &adapters).await,
            Strategy::SmartBest => self.smart_best(identifier, &adapters).await,
        };
        match &outcome {
            Ok(found) => info!(
                source = %found.record.source,
                completeness = found.record.completeness,
                failed_sources = found.failures.len(),
                "scrape succeeded"
            ),
            Err(error) => warn!(%error, "scrape failed"),
        }
        outcome
    }

    async fn fallback_chain(
        &self,
        identifier: &Identifier,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<ScrapeOutcome, OrchestratorError> {
        let mut failures = Vec::new();
        for adapter in adapters {
            match self.run_adapter(adapter, identifier).await {
                Ok(record) => return Ok(ScrapeOutcome { record, failures }),
                Err(error) => {
                    debug!(source = adapter.name(), %error, "source failed, trying next");
                    failures.push(SourceFailure {
                        source: adapter.name().to_string(),
                        error,
                    });
                }
            }
        }
        Err(all_failed(identifier, failures))
    }

    async fn parallel_race(
        &self,
        identifier: &Identifier,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<ScrapeOutcome, OrchestratorError> {
        let mut in_flight: FuturesUnordered<_> = adapters
            .iter()
            .map(|adapter| async move {
                (adapter.name(), self.run_adapter(adapter, identifier).await)
            })
            .collect();

        let mut failures = Vec::new();
        while let Some((source, result)) = in_flight.next().await {
            match result {
                Ok(record) => {
                    // Dropping the remaining futures abandons their requests.
                    debug!(source, abandoned = in_flight.len(), "race won");
                    return Ok(ScrapeOutcome { record, failures });
                }
                Err(error) => failures.push(SourceFailure {
                    source: source.to_string(),
                    error,
                }),
            }
        }
        Err(all_failed(identifier, failures))
    }

    async fn merge_all(
        &self,
        identifier: &Identifier,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<ScrapeOutcome, OrchestratorError> {
        let (records, failures) = self.settle_all(identifier, adapters).await;
        // join_all keeps input order, so the fold follows priority order.
        let merged = records
            .into_iter()
            .reduce(|acc, next| acc.merge(&next))
            .map(|record| record.with_completeness(&self.weights));
        match merged {
            Some(record) => Ok(ScrapeOutcome { record, failures }),
            None => Err(all_failed(identifier, failures)),
        }
    }

    async fn smart_best(
        &self,
        identifier: &Identifier,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<ScrapeOutcome, OrchestratorError> {
        let (records, failures) = self.settle_all(identifier, adapters).await;
        // Strictly greater only, so ties go to the higher-priority source.
        let best = records.into_iter().fold(None::<Record>, |best, candidate| match best {
            Some(current) if current.completeness >= candidate.completeness => Some(current),
            _ => Some(candidate),
        });
        match best {
            Some(record) => Ok(ScrapeOutcome { record, failures }),
            None => Err(all_failed(identifier, failures)),
        }
    }

    async fn settle_all(
        &self,
        identifier: &Identifier,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> (Vec<Record>, Vec<SourceFailure>) {
        let settled = join_all(
            adapters
                .iter()
                .map(|adapter| async move { (adapter.name(), self.run_adapter(adapter, identifier).await) }),
        )
        .await;

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for (source, result) in settled {
            match result {
                Ok(record) => records.push(record),
                Err(error) => failures.push(SourceFailure {
                    source: source.to_string(),
                    error,
                }),
            }
        }
        (records, failures)
    }

    async fn run_adapter(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        identifier: &Identifier,
    ) -> Result<Record, CrawlerError> {
        let request = ScrapeRequest::new(
            identifier.clone(),
            adapter.name(),
            self.priority,
            self.batch.scrape_timeout(),
        );
        match tokio::time::timeout_at(request.deadline, adapter.scrape(&request)).await {
            Ok(result) => result.map(|record| record.with_completeness(&self.weights)),
            Err(_) => {
                warn!(source = adapter.name(), "source deadline exceeded, abandoning");
                Err(CrawlerError::timeout(format!(
                    "{}:{}",
                    adapter.name(),
                    identifier.normalized()
                )))
            }
        }
    }

    /// Scrapes `identifiers` in chunks of `batch.concurrency`, pausing
    /// `batch.chunk_delay_ms` between chunks.
    ///
    /// A failed identifier never aborts the batch. `on_item` is called as each
    /// item completes (e.g. to advance a progress bar).
    #[instrument(skip(self, identifiers, on_item), fields(count = identifiers.len(), %strategy))]
    pub async fn scrape_batch<F>(
        &self,
        identifiers: Vec<Identifier>,
        strategy: Strategy,
        on_item: F,
    ) -> BatchReport
    where
        F: Fn(&BatchItem),
    {
        let chunk_size = self.batch.concurrency.max(1);
        let chunk_delay = Duration::from_millis(self.batch.chunk_delay_ms);
        let total_chunks = identifiers.len().div_ceil(chunk_size);
        let mut report = BatchReport::default();
        let on_item = &on_item;

        for (index, chunk) in identifiers.chunks(chunk_size).enumerate() {
            if index > 0 && !chunk_delay.is_zero() {
                debug!(delay_ms = chunk_delay.as_millis(), "pausing between chunks");
                tokio::time::sleep(chunk_delay).await;
            }
            debug!(chunk = index + 1, total_chunks, size = chunk.len(), "scraping chunk");

            let results = join_all(chunk.iter().map(|identifier| async move {
                let result = self.scrape(identifier, strategy).await;
                let item = BatchItem {
                    identifier: identifier.clone(),
                    result,
                };
                on_item(&item);
                item
            }))
            .await;
            report.items.extend(results);
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch complete"
        );
        report
    }
}

fn all_failed(identifier: &Identifier, failures: Vec<SourceFailure>) -> OrchestratorError {
    OrchestratorError::AllSourcesFailed {
        identifier: identifier.normalized().to_string(),
        failures,
    }
}
