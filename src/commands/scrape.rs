//! Scrape command: batch scrape, then print, save or compare records.

use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use metascraper_core::compare::BaselineError;
use metascraper_core::{
    BaselineStore, BatchReport, Comparator, EngineConfig, EngineEvent, EventBus, Identifier,
    Normalizer, Orchestrator, Record, ResilientClient, build_registry,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{config, exit_handler, input, progress, terminal};
use crate::cli::ScrapeArgs;

pub async fn run_scrape_command(
    args: &ScrapeArgs,
    config: EngineConfig,
    quiet: bool,
) -> Result<ProcessExit> {
    let config = config::apply_scrape_overrides(config, args)?;
    if config.sources.definitions.is_empty() {
        bail!(
            "no sources configured\n  Suggestion: Pass --config with a `sources.definitions` list"
        );
    }

    let raw_inputs = input::collect_inputs(&args.ids)?;
    if raw_inputs.is_empty() {
        info!("No identifiers given. Pass them as arguments or pipe them via stdin.");
        return Ok(ProcessExit::Success);
    }
    let normalizer =
        Normalizer::from_config(&config.normalizer).context("invalid normalizer configuration")?;
    let (identifiers, unrecognized) = normalize_all(&normalizer, &raw_inputs);

    let events = EventBus::default();
    let event_logger = spawn_event_logger(&events);
    let client = Arc::new(
        ResilientClient::from_config(&config, events).context("could not build HTTP client")?,
    );
    let background = client.spawn_background_tasks();
    let registry = build_registry(&config, &client).context("invalid source definition")?;
    let orchestrator = Orchestrator::from_config(Arc::new(registry), &config);

    info!(
        identifiers = identifiers.len(),
        sources = orchestrator.registry().len(),
        strategy = %args.strategy,
        "Scrape starting"
    );

    let show_progress = terminal::should_use_progress(
        std::io::stderr().is_terminal(),
        quiet,
        terminal::is_dumb_terminal(),
    );
    let bar = progress::batch_progress(show_progress, identifiers.len());
    let report = orchestrator
        .scrape_batch(identifiers, args.strategy, |item| {
            bar.inc(1);
            bar.set_message(item.identifier.to_string());
        })
        .await;
    bar.finish_and_clear();

    for handle in background {
        handle.abort();
    }
    event_logger.abort();

    let mut failed = unrecognized + report.failed();
    failed += emit_records(&report, args, &config)?;
    let succeeded = report.succeeded();

    let block_rate = client.detector().detection_rate() * 100.0;
    if block_rate > 0.0 {
        warn!("{block_rate:.1}% of recent responses were anti-automation pages");
    }
    info!(succeeded, failed, block_rate = %format!("{block_rate:.1}%"), "Scrape complete");
    Ok(exit_handler::determine_exit_outcome(succeeded, failed))
}

fn normalize_all(normalizer: &Normalizer, inputs: &[String]) -> (Vec<Identifier>, usize) {
    let mut identifiers: Vec<Identifier> = Vec::with_capacity(inputs.len());
    let mut unrecognized = 0;
    for raw in inputs {
        match normalizer.normalize(raw) {
            Ok(identifier) if identifiers.contains(&identifier) => {
                debug!(%identifier, "duplicate identifier skipped");
            }
            Ok(identifier) => identifiers.push(identifier),
            Err(err) => {
                unrecognized += 1;
                warn!(input = %raw, "{err}");
            }
        }
    }
    (identifiers, unrecognized)
}

/// Logs engine events until aborted.
fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ProxyDisabled {
            proxy,
            consecutive_failures,
        } => warn!(%proxy, consecutive_failures, "proxy disabled"),
        EngineEvent::ProxyReactivated { proxy } => info!(%proxy, "proxy reactivated"),
        EngineEvent::RateAdjusted {
            from,
            to,
            error_rate,
        } => info!(from, to, error_rate, "request rate adjusted"),
        EngineEvent::CooldownStarted { duration } => {
            warn!(cooldown_ms = duration.as_millis(), "rate limiter cooling down");
        }
        EngineEvent::CooldownEnded => info!("rate limiter cooldown ended"),
        EngineEvent::BlockDetected { url, confidence } => {
            warn!(%url, confidence, "anti-automation block detected");
        }
    }
}

/// Writes or prints each record and handles baselines; returns the number of
/// records that failed a baseline comparison.
fn emit_records(report: &BatchReport, args: &ScrapeArgs, config: &EngineConfig) -> Result<usize> {
    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create output directory {}", dir.display()))?;
    }
    let baselines = args.baseline_dir.as_ref().map(BaselineStore::new);
    let comparator = Comparator::new(config.compare.clone());
    let mut regressions = 0;

    for item in &report.items {
        let outcome = match &item.result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(identifier = %item.identifier, "{err}");
                continue;
            }
        };
        for failure in &outcome.failures {
            debug!(identifier = %item.identifier, %failure, "source failed");
        }
        let record = &outcome.record;

        match &args.output_dir {
            Some(dir) => write_record(dir, record)?,
            None => println!("{}", serde_json::to_string(record)?),
        }

        let Some(store) = &baselines else {
            continue;
        };
        if args.save_baseline {
            let path = store.save(record)?;
            info!(path = %path.display(), "baseline saved");
            continue;
        }
        match store.load(&record.identifier, &record.source) {
            Ok(baseline) => {
                let result = comparator.compare_fields(&baseline, &record.to_fields());
                if result.is_exact() {
                    info!(identifier = %record.identifier, "matches baseline");
                } else {
                    regressions += 1;
                    for field in result.mismatches() {
                        warn!(
                            identifier = %record.identifier,
                            field = %field.field,
                            detail = %field.detail,
                            "baseline mismatch"
                        );
                    }
                    warn!(
                        identifier = %record.identifier,
                        match_rate = result.match_rate,
                        "record differs from baseline"
                    );
                }
            }
            Err(err @ BaselineError::Missing { .. }) => warn!("{err}"),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(regressions)
}

fn write_record(dir: &Path, record: &Record) -> Result<()> {
    let path = dir.join(format!("{}.json", record.identifier));
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&path, json).with_context(|| format!("could not write {}", path.display()))?;
    debug!(path = %path.display(), "record written");
    Ok(())
}
