//! Series prefix to studio lookup, backed by an embedded data table.

use std::collections::HashMap;
use std::sync::LazyLock;

static STUDIO_TABLE: &str = include_str!("../../data/studio_prefixes.tsv");

static STUDIOS: LazyLock<HashMap<String, String>> = LazyLock::new(|| parse_table(STUDIO_TABLE));

fn parse_table(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (prefix, studio) = line.split_once('\t')?;
            let (prefix, studio) = (prefix.trim(), studio.trim());
            (!prefix.is_empty() && !studio.is_empty())
                .then(|| (prefix.to_ascii_uppercase(), studio.to_string()))
        })
        .collect()
}

/// Returns the studio that publishes the given series prefix, if known.
#[must_use]
pub fn studio_for_series(series: &str) -> Option<&'static str> {
    STUDIOS
        .get(&series.to_ascii_uppercase())
        .map(String::as_str)
}
