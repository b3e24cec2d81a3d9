//! Config file loading and CLI overrides.

use std::path::Path;

use anyhow::{Context, Result};
use metascraper_core::EngineConfig;
use tracing::debug;

use crate::cli::ScrapeArgs;

/// Loads the config file when given, otherwise built-in defaults.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::from_path(path)
                .with_context(|| format!("could not load config {}", path.display()))?;
            debug!(path = %path.display(), sources = config.sources.definitions.len(), "config loaded");
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Applies `scrape` flags on top of file values and re-validates.
pub(crate) fn apply_scrape_overrides(mut config: EngineConfig, args: &ScrapeArgs) -> Result<EngineConfig> {
    if let Some(concurrency) = args.concurrency {
        config.batch.concurrency = usize::from(concurrency);
    }
    if let Some(retries) = args.max_retries {
        config.retry.max_attempts = u32::from(retries) + 1;
    }
    if let Some(rate) = args.rate {
        if rate <= 0.0 {
            debug!("rate limiting disabled");
            config.rate_limit.enabled = false;
        } else {
            config.rate_limit.enabled = true;
            config.rate_limit.requests_per_second = rate;
        }
    }
    config.validate().context("invalid value after applying command-line flags")?;
    Ok(config)
}
