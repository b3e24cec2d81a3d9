//! Normalize command: file names to canonical identifiers.

use anyhow::{Context, Result};
use metascraper_core::{EngineConfig, Normalizer};
use tracing::warn;

use crate::ProcessExit;
use crate::app::{exit_handler, input};
use crate::cli::NormalizeArgs;

/// Prints `raw<TAB>IDENTIFIER<TAB>format` per recognized name.
pub fn run_normalize_command(args: &NormalizeArgs, config: &EngineConfig) -> Result<ProcessExit> {
    let normalizer =
        Normalizer::from_config(&config.normalizer).context("invalid normalizer configuration")?;
    let names = input::collect_inputs(&args.names)?;
    if names.is_empty() {
        println!("No names given. Pass file names as arguments or pipe them via stdin.");
        return Ok(ProcessExit::Success);
    }

    let mut failed = 0;
    for name in &names {
        match normalizer.normalize(name) {
            Ok(identifier) => {
                println!("{name}\t{identifier}\t{}", identifier.format());
            }
            Err(err) => {
                failed += 1;
                warn!(name = %name, "{err}");
            }
        }
    }
    Ok(exit_handler::determine_exit_outcome(names.len() - failed, failed))
}
