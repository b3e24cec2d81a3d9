//! Metascraper Core Library
//!
//! Resilient metadata scraping for identifier-keyed media libraries: noisy
//! file names are normalized into canonical identifiers, records are fetched
//! from several sites under blocking, rate limits and odd encodings, results
//! are reconciled across sources, and fresh output is diffed against stored
//! baselines.
//!
//! # Architecture
//!
//! - [`identifier`] - file name to canonical identifier
//! - [`http`] - rate limiter, proxy pool, anti-automation detector, retrying client
//! - [`source`] - source adapters and their registry
//! - [`orchestrator`] - fallback, race, merge and best-of strategies plus batches
//! - [`compare`] - regression comparator and baseline storage
//! - [`config`] - engine configuration
//! - [`events`] - broadcast of proxy, rate and block events

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compare;
pub mod config;
pub mod events;
pub mod http;
pub mod identifier;
pub mod orchestrator;
pub mod record;
pub mod source;
pub mod user_agent;
pub mod util;

// Re-export commonly used types
pub use compare::{BaselineStore, Comparator, ComparisonResult, FieldCategory, FieldResult};
pub use config::{ConfigError, EngineConfig};
pub use events::{EngineEvent, EventBus};
pub use http::{CrawlerError, ErrorKind, FetchOptions, ResilientClient};
pub use identifier::{Format, Identifier, NormalizationError, Normalizer, normalize};
pub use orchestrator::{
    BatchReport, Orchestrator, OrchestratorError, ScrapeOutcome, SourceFailure, Strategy,
};
pub use record::{FieldMap, Record};
pub use source::{ScrapeRequest, SourceAdapter, SourceRegistry, build_registry};
