//! Error types for identifier normalization.

use thiserror::Error;

/// Errors that can occur while normalizing a raw name into an [`Identifier`](super::Identifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    /// Input was empty or whitespace only.
    #[error("cannot normalize an empty name\n  Suggestion: Pass a file name, path or identifier")]
    Empty,

    /// No identifier family matched the name or any consulted parent directory.
    #[error(
        "no identifier found in '{raw}' (checked {candidates} candidate(s))\n  Suggestion: Rename the file to include a code like ABC-123, or add an ignore pattern for the noise around it"
    )]
    Unrecognized {
        /// The raw input as given.
        raw: String,
        /// How many name components were tried (file name plus parents).
        candidates: usize,
    },
}

impl NormalizationError {
    /// Creates an `Unrecognized` error for the given raw input.
    #[must_use]
    pub fn unrecognized(raw: &str, candidates: usize) -> Self {
        Self::Unrecognized {
            raw: raw.to_string(),
            candidates,
        }
    }
}
