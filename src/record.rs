//! Normalized metadata records.
//!
//! A [`Record`] is what a source adapter produces for one identifier. Records
//! from several sources are combined with [`Record::merge`], which never
//! mutates either input:
//!
//! - scalar fields: the right-hand record wins when it has a value;
//! - list fields: ordered union, left-hand order first;
//! - tag set: set union.
//!
//! The list/set parts of merge are associative, which is what lets the
//! orchestrator fold any number of records in declared priority order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CompletenessWeights;

/// Flat field view of a record, as stored in baselines and compared for regressions.
pub type FieldMap = BTreeMap<String, Value>;

/// Metadata for one title, as produced by a source adapter or a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Canonical identifier (`IPX-177`).
    pub identifier: String,
    /// Detail page or API URL the record was read from.
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
    /// Site rating, 0-10 scale as published by the site.
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub studio: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    /// Ordered cast list without duplicates.
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub sample_images: Vec<String>,
    #[serde(default)]
    pub trailer_url: Option<String>,
    /// Source name, or `a+b` for merged records.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    /// Completeness score 0-100.
    #[serde(default)]
    pub completeness: u8,
}

impl Record {
    /// Creates an empty record for `identifier` fetched from `source` now.
    #[must_use]
    pub fn new(identifier: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            source_url: None,
            title: None,
            synopsis: None,
            release_date: None,
            runtime_minutes: None,
            score: None,
            studio: None,
            director: None,
            cast: Vec::new(),
            tags: BTreeSet::new(),
            cover_url: None,
            sample_images: Vec::new(),
            trailer_url: None,
            source: source.into(),
            fetched_at: Utc::now(),
            completeness: 0,
        }
    }

    /// Adds a cast member unless already present (case-sensitive, trimmed).
    pub fn push_cast(&mut self, name: &str) {
        push_unique(&mut self.cast, name);
    }

    /// Adds a sample image URL unless already present.
    pub fn push_sample_image(&mut self, url: &str) {
        push_unique(&mut self.sample_images, url);
    }

    /// Adds a tag (trimmed, empty tags ignored).
    pub fn insert_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() {
            self.tags.insert(tag.to_string());
        }
    }

    /// Merges `other` over `self`, returning a new record.
    ///
    /// Scalars: `other` wins when it has a value. Lists: ordered union. Tags:
    /// set union. Provenance: distinct source names joined with `+`, latest
    /// fetch time. Completeness is recomputed with default weights.
    #[must_use]
    pub fn merge(&self, other: &Record) -> Record {
        let mut merged = self.clone();

        merge_scalar(&mut merged.source_url, &other.source_url);
        merge_scalar(&mut merged.title, &other.title);
        merge_scalar(&mut merged.synopsis, &other.synopsis);
        merge_scalar(&mut merged.release_date, &other.release_date);
        merge_scalar(&mut merged.runtime_minutes, &other.runtime_minutes);
        merge_scalar(&mut merged.score, &other.score);
        merge_scalar(&mut merged.studio, &other.studio);
        merge_scalar(&mut merged.director, &other.director);
        merge_scalar(&mut merged.cover_url, &other.cover_url);
        merge_scalar(&mut merged.trailer_url, &other.trailer_url);

        for name in &other.cast {
            push_unique(&mut merged.cast, name);
        }
        for url in &other.sample_images {
            push_unique(&mut merged.sample_images, url);
        }
        merged.tags.extend(other.tags.iter().cloned());

        for name in other.source.split('+') {
            if !merged.source.split('+').any(|existing| existing == name) {
                merged.source.push('+');
                merged.source.push_str(name);
            }
        }
        merged.fetched_at = merged.fetched_at.max(other.fetched_at);
        merged.completeness = merged.completeness_score(&CompletenessWeights::default());
        merged
    }

    /// Weighted share (0-100) of populated fields.
    #[must_use]
    pub fn completeness_score(&self, weights: &CompletenessWeights) -> u8 {
        let parts = [
            (weights.title, has_text(self.title.as_deref())),
            (weights.cover, has_text(self.cover_url.as_deref())),
            (weights.cast, !self.cast.is_empty()),
            (weights.tags, !self.tags.is_empty()),
            (weights.synopsis, has_text(self.synopsis.as_deref())),
            (weights.release_date, self.release_date.is_some()),
            (weights.runtime, self.runtime_minutes.is_some()),
            (weights.studio, has_text(self.studio.as_deref())),
            (weights.score, self.score.is_some()),
        ];
        let total: u32 = parts.iter().map(|(w, _)| w).sum();
        if total == 0 {
            return 0;
        }
        let present: u32 = parts
            .iter()
            .filter(|(_, present)| *present)
            .map(|(w, _)| w)
            .sum();
        #[allow(clippy::cast_possible_truncation)]
        let score = (u64::from(present) * 100 / u64::from(total)) as u8;
        score
    }

    /// Returns a copy with the completeness score computed from `weights`.
    #[must_use]
    pub fn with_completeness(mut self, weights: &CompletenessWeights) -> Self {
        self.completeness = self.completeness_score(weights);
        self
    }

    /// Flat field view used for baselines and regression comparison.
    ///
    /// Absent scalars and empty lists are omitted; provenance fields
    /// (`source`, `fetched_at`, `completeness`) are excluded since they change
    /// on every run.
    #[must_use]
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("identifier".to_string(), Value::from(self.identifier.clone()));

        let mut text = |key: &str, value: &Option<String>| {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                fields.insert(key.to_string(), Value::from(value));
            }
        };
        text("source_url", &self.source_url);
        text("title", &self.title);
        text("synopsis", &self.synopsis);
        text("studio", &self.studio);
        text("director", &self.director);
        text("cover_url", &self.cover_url);
        text("trailer_url", &self.trailer_url);

        if let Some(date) = self.release_date {
            fields.insert(
                "release_date".to_string(),
                Value::from(date.format("%Y-%m-%d").to_string()),
            );
        }
        if let Some(runtime) = self.runtime_minutes {
            fields.insert("runtime_minutes".to_string(), Value::from(runtime));
        }
        if let Some(score) = self.score {
            fields.insert("score".to_string(), Value::from(f64::from(score)));
        }
        if !self.cast.is_empty() {
            fields.insert("cast".to_string(), Value::from(self.cast.clone()));
        }
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().cloned().collect();
            fields.insert("tags".to_string(), Value::from(tags));
        }
        if !self.sample_images.is_empty() {
            fields.insert(
                "sample_images".to_string(),
                Value::from(self.sample_images.clone()),
            );
        }
        fields
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn merge_scalar<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}
