//! Regression comparison between a stored baseline and a fresh record.
//!
//! Every field name is assigned a category from [`CompareConfig`] and compared
//! with that category's rule:
//!
//! | Category | Rule |
//! |----------|------|
//! | volatile | both present or both absent |
//! | url      | URL path only; host and query are ignored |
//! | set      | unordered, trimmed element equality |
//! | text     | whitespace-collapsed (optionally case-folded) equality, then similarity |
//! | exact    | trimmed value equality |
//!
//! The match rate is the share of matching fields over the union of field
//! names present on either side.

mod baseline;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub use baseline::{BaselineError, BaselineKey, BaselineStore, load_fields};

use crate::config::CompareConfig;
use crate::record::{FieldMap, Record};
use crate::util::collapse_whitespace;

/// Comparison rule applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Volatile,
    Url,
    Set,
    Text,
    Exact,
}

impl fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Volatile => "volatile",
            Self::Url => "url",
            Self::Set => "set",
            Self::Text => "text",
            Self::Exact => "exact",
        };
        f.write_str(name)
    }
}

/// Outcome for a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldResult {
    pub field: String,
    pub matched: bool,
    pub category: FieldCategory,
    /// Human-readable explanation, empty for plain matches.
    pub detail: String,
}

/// Structured diff between two records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Percentage of matching fields, `0.0..=100.0`.
    pub match_rate: f64,
    /// One entry per field name, sorted by name.
    pub field_results: Vec<FieldResult>,
}

impl ComparisonResult {
    /// Fields that did not match.
    pub fn mismatches(&self) -> impl Iterator<Item = &FieldResult> {
        self.field_results.iter().filter(|r| !r.matched)
    }

    /// Whether every compared field matched.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.field_results.iter().all(|r| r.matched)
    }
}

/// Field-aware record comparator.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    config: CompareConfig,
}

impl Comparator {
    #[must_use]
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    /// Category assigned to `field`; unlisted fields compare exactly.
    #[must_use]
    pub fn category(&self, field: &str) -> FieldCategory {
        let listed = |names: &[String]| names.iter().any(|n| n == field);
        if listed(&self.config.volatile_fields) {
            FieldCategory::Volatile
        } else if listed(&self.config.url_fields) {
            FieldCategory::Url
        } else if listed(&self.config.set_fields) {
            FieldCategory::Set
        } else if listed(&self.config.text_fields) {
            FieldCategory::Text
        } else {
            FieldCategory::Exact
        }
    }

    /// Compares two records through their flat field views.
    #[must_use]
    pub fn compare(&self, baseline: &Record, current: &Record) -> ComparisonResult {
        self.compare_fields(&baseline.to_fields(), &current.to_fields())
    }

    /// Compares two flat field maps.
    #[must_use]
    pub fn compare_fields(&self, baseline: &FieldMap, current: &FieldMap) -> ComparisonResult {
        let names: BTreeSet<&String> = baseline.keys().chain(current.keys()).collect();

        let field_results: Vec<FieldResult> = names
            .into_iter()
            .map(|name| {
                let category = self.category(name);
                let (matched, detail) =
                    self.compare_field(category, baseline.get(name), current.get(name));
                FieldResult {
                    field: name.clone(),
                    matched,
                    category,
                    detail,
                }
            })
            .collect();

        let matched = field_results.iter().filter(|r| r.matched).count();
        #[allow(clippy::cast_precision_loss)]
        let match_rate = if field_results.is_empty() {
            100.0
        } else {
            matched as f64 * 100.0 / field_results.len() as f64
        };
        debug!(fields = field_results.len(), matched, match_rate, "compared records");

        ComparisonResult {
            match_rate,
            field_results,
        }
    }

    fn compare_field(
        &self,
        category: FieldCategory,
        baseline: Option<&Value>,
        current: Option<&Value>,
    ) -> (bool, String) {
        let (baseline, current) = match (baseline, current) {
            (Some(b), Some(c)) => (b, c),
            (None, None) => return (true, String::new()),
            (Some(_), None) if category == FieldCategory::Volatile => {
                return (false, "present only in baseline".to_string());
            }
            (None, Some(_)) if category == FieldCategory::Volatile => {
                return (false, "present only in current".to_string());
            }
            (Some(_), None) => return (false, "missing in current".to_string()),
            (None, Some(_)) => return (false, "missing in baseline".to_string()),
        };

        match category {
            FieldCategory::Volatile => (true, String::new()),
            FieldCategory::Url => compare_urls(baseline, current),
            FieldCategory::Set => compare_sets(baseline, current),
            FieldCategory::Text => self.compare_text(baseline, current),
            FieldCategory::Exact => {
                if exact_text(baseline) == exact_text(current) {
                    (true, String::new())
                } else {
                    (false, format!("{baseline} != {current}"))
                }
            }
        }
    }

    fn compare_text(&self, baseline: &Value, current: &Value) -> (bool, String) {
        let normalize = |value: &Value| {
            let text = collapse_whitespace(&exact_text(value));
            if self.config.case_insensitive {
                text.to_lowercase()
            } else {
                text
            }
        };
        let (b, c) = (normalize(baseline), normalize(current));
        if b == c {
            return (true, String::new());
        }

        let similarity = strsim::normalized_levenshtein(&b, &c);
        let matched = !self.config.strict && similarity >= self.config.similarity_threshold;
        (matched, format!("similarity {similarity:.2}"))
    }
}

fn exact_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(exact_text).collect(),
        other => vec![exact_text(other)],
    }
}

/// Path component of `raw`, or the raw string without its query when it is not absolute.
fn url_path(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

fn compare_urls(baseline: &Value, current: &Value) -> (bool, String) {
    let b: Vec<String> = strings(baseline).iter().map(|u| url_path(u)).collect();
    let c: Vec<String> = strings(current).iter().map(|u| url_path(u)).collect();
    if b == c {
        (true, String::new())
    } else if b.len() == c.len() {
        let first = b
            .iter()
            .zip(&c)
            .find(|(x, y)| x != y)
            .map(|(x, y)| format!("path {x} != {y}"))
            .unwrap_or_default();
        (false, first)
    } else {
        (false, format!("{} urls in baseline, {} in current", b.len(), c.len()))
    }
}

fn compare_sets(baseline: &Value, current: &Value) -> (bool, String) {
    let b: BTreeSet<String> = strings(baseline).into_iter().filter(|s| !s.is_empty()).collect();
    let c: BTreeSet<String> = strings(current).into_iter().filter(|s| !s.is_empty()).collect();
    if b == c {
        return (true, String::new());
    }
    let missing: Vec<&str> = b.difference(&c).map(String::as_str).collect();
    let extra: Vec<&str> = c.difference(&b).map(String::as_str).collect();
    let mut detail = Vec::new();
    if !missing.is_empty() {
        detail.push(format!("missing: {}", missing.join(", ")));
    }
    if !extra.is_empty() {
        detail.push(format!("extra: {}", extra.join(", ")));
    }
    (false, detail.join("; "))
}
