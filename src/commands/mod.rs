//! CLI command handlers.

mod compare;
mod normalize;
mod scrape;

pub use compare::run_compare_command;
pub use normalize::run_normalize_command;
pub use scrape::run_scrape_command;
