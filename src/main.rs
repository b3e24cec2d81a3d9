//! CLI entry point for metascraper.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

mod app;
mod cli;
mod commands;

use cli::{Cli, Command};

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything succeeded.
    Success,
    /// Some items failed (or a comparison fell short).
    Partial,
    /// Nothing succeeded.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let no_color = app::terminal::should_disable_color(
        app::terminal::no_color_env_requested(),
        app::terminal::is_dumb_terminal(),
    );
    app::terminal::init_tracing(app::terminal::default_log_level(cli.verbose, cli.quiet), no_color);
    debug!(?cli, "CLI arguments parsed");

    let config = match app::config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(1);
        }
    };

    let result = match &cli.command {
        Command::Normalize(args) => commands::run_normalize_command(args, &config),
        Command::Scrape(args) => commands::run_scrape_command(args, config, cli.quiet).await,
        Command::Compare(args) => commands::run_compare_command(args, &config),
    };

    match result {
        Ok(exit) => exit.into(),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}
