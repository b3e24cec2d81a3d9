//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use metascraper_core::Strategy;

/// Resilient metadata scraping for identifier-keyed media libraries.
///
/// Normalizes noisy file names into canonical identifiers, scrapes records
/// from the configured sources, and diffs records against stored baselines.
#[derive(Parser, Debug)]
#[command(name = "metascraper")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the canonical identifier for each file name or path
    Normalize(NormalizeArgs),
    /// Scrape records for identifiers (or file names) from the configured sources
    Scrape(ScrapeArgs),
    /// Compare a baseline document with a current one
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// File names or paths; read from stdin (one per line) when omitted
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Identifiers or file names; read from stdin (one per line) when omitted
    pub ids: Vec<String>,

    /// How sources are combined: fallback-chain, parallel-race, merge-all, smart-best
    #[arg(short = 's', long, default_value_t = Strategy::FallbackChain)]
    pub strategy: Strategy,

    /// Identifiers scraped concurrently (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Retries after the first attempt for transient failures (0-9)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub max_retries: Option<u8>,

    /// Requests per second admitted by the rate limiter (0 to disable)
    #[arg(short = 'l', long, value_parser = parse_rate)]
    pub rate: Option<f64>,

    /// Write each record as `<identifier>.json` into this directory instead of stdout
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Baseline directory to compare each record against
    #[arg(long, value_name = "DIR")]
    pub baseline_dir: Option<PathBuf>,

    /// Record fresh baselines into --baseline-dir instead of comparing
    #[arg(long, requires = "baseline_dir")]
    pub save_baseline: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Baseline field document (JSON object)
    pub baseline: PathBuf,

    /// Current field document (JSON object)
    pub current: PathBuf,

    /// Treat any text difference as a mismatch
    #[arg(long)]
    pub strict: bool,

    /// Case-fold text fields before comparing
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Lowest match rate (percent) that still counts as passing
    #[arg(long, default_value_t = 100.0, value_parser = parse_percent)]
    pub min_rate: f64,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if rate.is_finite() && (0.0..=1000.0).contains(&rate) {
        Ok(rate)
    } else {
        Err("rate must be between 0 and 1000".to_string())
    }
}

fn parse_percent(value: &str) -> Result<f64, String> {
    let percent: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=100.0).contains(&percent) {
        Ok(percent)
    } else {
        Err("expected a percentage between 0 and 100".to_string())
    }
}
