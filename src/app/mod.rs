//! Shared plumbing for the CLI commands.

pub(crate) mod config;
pub(crate) mod exit_handler;
pub(crate) mod input;
pub(crate) mod progress;
pub(crate) mod terminal;
