//! Identifier normalization.
//!
//! Turns noisy file names and paths (`"[SITE] ipx-177 1080p.mp4"`) into a
//! canonical [`Identifier`] (`IPX-177`) that keys every downstream lookup.
//!
//! # Pipeline
//!
//! 1. Split the path; take the last component and strip a known video extension.
//! 2. Remove noise with the configured ignore patterns (resolution markers,
//!    watermark domains, subtitle/part suffixes).
//! 3. Upper-case and try each identifier family in order (see [`patterns`]).
//! 4. If nothing matched and the name contains `)(`, join the groups with `-`
//!    and retry.
//! 5. If the file name still yields nothing, retry on up to
//!    `max_parent_depth` parent directory names, nearest first.
//!
//! Normalization is idempotent: feeding [`Identifier::normalized`] back in
//! yields an equal identifier.
//!
//! # Example
//!
//! ```
//! use metascraper_core::identifier::{normalize, Format};
//!
//! let id = normalize("[SITE] ipx-177 1080p.mp4").unwrap();
//! assert_eq!(id.normalized(), "IPX-177");
//! assert_eq!(id.format(), Format::Standard);
//! assert_eq!(normalize(id.normalized()).unwrap(), id);
//! ```

mod error;
pub mod patterns;
mod studios;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::config::{ConfigError, NormalizerConfig};
use crate::util::compile_static_regex;

pub use error::NormalizationError;
pub use patterns::classify;
pub use studios::studio_for_series;

/// Known video/container extensions stripped from the file name.
static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)\.(?:mp4|mkv|avi|wmv|mov|flv|ts|m2ts|m4v|rmvb|rm|webm|iso|strm|mpg|mpeg|vob|3gp)$",
    )
});

static DEFAULT_NORMALIZER: LazyLock<Normalizer> = LazyLock::new(|| {
    let config = NormalizerConfig::default();
    Normalizer {
        ignore_patterns: config
            .ignore_patterns
            .iter()
            .map(|p| compile_static_regex(p))
            .collect(),
        max_parent_depth: config.max_parent_depth,
    }
});

/// Identifier family, used to pick eligible source adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// `LETTERS-DIGITS` codes such as `IPX-177`.
    Standard,
    /// `FC2-PPV-<digits>` codes.
    SpecialA,
    /// Other prefixed or date-coded families (`HEYZO-1234`, `010124-001`).
    SpecialB,
    /// Parsed from a distributor content id such as `ipx00177`.
    ContentId,
    /// No recognized shape.
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standard => "standard",
            Self::SpecialA => "special_a",
            Self::SpecialB => "special_b",
            Self::ContentId => "content_id",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A canonical title identifier.
///
/// Immutable once produced. Equality and hashing use only the normalized form,
/// so identifiers parsed from different raw names compare equal.
#[derive(Debug, Clone, Serialize)]
pub struct Identifier {
    raw: String,
    normalized: String,
    series: String,
    number: String,
    studio: Option<String>,
    format: Format,
}

impl Identifier {
    /// The input this identifier was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Canonical form, e.g. `IPX-177`.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Series part (`IPX`, `FC2-PPV`, or the date for date-coded ids).
    #[must_use]
    pub fn series(&self) -> &str {
        &self.series
    }

    /// Number part as written in the canonical form.
    #[must_use]
    pub fn number(&self) -> &str {
        &self.number
    }

    /// Studio inferred from the series prefix, if known.
    #[must_use]
    pub fn studio(&self) -> Option<&str> {
        self.studio.as_deref()
    }

    /// Family this identifier was parsed as.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Distributor content id form: lower-case series plus a five-digit padded number (`ipx00177`).
    #[must_use]
    pub fn content_id(&self) -> String {
        format!("{}{:0>5}", self.series.to_ascii_lowercase(), self.number)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Identifier normalizer with a configurable ignore-pattern set.
#[derive(Debug, Clone)]
pub struct Normalizer {
    ignore_patterns: Vec<Regex>,
    max_parent_depth: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        DEFAULT_NORMALIZER.clone()
    }
}

impl Normalizer {
    /// Builds a normalizer from config, compiling its ignore patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pattern`] if an ignore pattern is not a valid regex.
    pub fn from_config(config: &NormalizerConfig) -> Result<Self, ConfigError> {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ignore_patterns,
            max_parent_depth: config.max_parent_depth,
        })
    }

    /// Normalizes a raw file name, path or identifier string.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizationError::Empty`] for blank input and
    /// [`NormalizationError::Unrecognized`] when no family matches the file
    /// name or any consulted parent directory.
    #[instrument(skip(self), fields(max_parent_depth = self.max_parent_depth))]
    pub fn normalize(&self, raw: &str) -> Result<Identifier, NormalizationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NormalizationError::Empty);
        }

        let components: Vec<&str> = trimmed
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        let Some((file_name, parents)) = components.split_last() else {
            return Err(NormalizationError::unrecognized(raw, 0));
        };

        let stem = EXTENSION_RE.replace(file_name, "");
        let mut candidates: Vec<&str> = vec![&*stem];
        candidates.extend(parents.iter().rev().take(self.max_parent_depth).copied());

        for (depth, candidate) in candidates.iter().enumerate() {
            if let Some(found) = self.identify(candidate) {
                debug!(
                    raw,
                    normalized = %found.normalized,
                    format = %found.format,
                    depth,
                    "identifier normalized"
                );
                let studio = studio_for_series(&found.series).map(str::to_string);
                return Ok(Identifier {
                    raw: raw.to_string(),
                    normalized: found.normalized,
                    series: found.series,
                    number: found.number,
                    studio,
                    format: found.format,
                });
            }
        }

        debug!(raw, candidates = candidates.len(), "no identifier family matched");
        Err(NormalizationError::unrecognized(raw, candidates.len()))
    }

    /// Cleans one name component and tries the families on it.
    ///
    /// A component already in canonical shape skips noise stripping, so a
    /// series that doubles as a noise token (`HD-123`, `SD-045`) survives a
    /// second pass.
    fn identify(&self, candidate: &str) -> Option<patterns::FamilyMatch> {
        let upper = candidate.trim().to_uppercase();
        if classify(&upper) != Format::Unknown {
            trace!(candidate, "already canonical");
            return patterns::match_families(&upper);
        }

        let cleaned = self.strip_noise(candidate).to_uppercase();
        trace!(candidate, cleaned = %cleaned, "trying identifier families");

        if let Some(found) = patterns::match_families(&cleaned) {
            return Some(found);
        }
        if cleaned.contains(")(") {
            let joined = cleaned.replace(")(", "-");
            trace!(joined = %joined, "retrying with joined bracket groups");
            return patterns::match_families(&joined);
        }
        None
    }

    fn strip_noise(&self, candidate: &str) -> String {
        let mut cleaned = candidate.trim().to_string();
        for pattern in &self.ignore_patterns {
            let replaced = pattern.replace_all(&cleaned, " ");
            cleaned = replaced.trim().to_string();
        }
        cleaned
    }
}

/// Normalizes with the default ignore patterns.
///
/// # Errors
///
/// See [`Normalizer::normalize`].
pub fn normalize(raw: &str) -> Result<Identifier, NormalizationError> {
    DEFAULT_NORMALIZER.normalize(raw)
}
