//! Identifier family patterns.
//!
//! Families are tried in a fixed order: the prefixed special families first,
//! then date-coded digit-only codes, then DMM-style content ids, and finally the
//! generic `LETTERS-DIGITS` form. Earlier families win, so a special prefix is
//! never swallowed by the generic pattern.
//!
//! All patterns run on the cleaned, upper-cased candidate. The `regex` crate has
//! no look-around, so boundaries are expressed as non-capturing alternations
//! with `^`/`$`.

use std::sync::LazyLock;

use regex::Regex;

use super::Format;
use crate::util::compile_static_regex;

/// `FC2-PPV-1234567`, `FC2PPV 1234567`, `fc2-1234567`.
static FC2_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"FC2[-_ ]*(?:PPV[-_ ]*)?(\d{5,8})(?:\D|$)"));

/// `HEYZO-1234`, `heyzo_hd_1234`.
static HEYZO_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"HEYZO[-_ ]*(?:HD[-_ ]*)?(\d{4})(?:\D|$)"));

/// Date-coded digit-only codes: `123456-789`, `010124_001`.
static DATE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?:^|\D)(\d{6})[-_](\d{2,3})(?:\D|$)"));

/// Content ids without a separator and a zero-padded five-digit number: `IPX00177`, `118ABP00123`, `H_1234ABC00123`.
static CONTENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?:^|[^A-Z0-9])(?:H_\d{3,4}|\d{1,4})?([A-Z]{2,10})(0\d{4})(?:\D|$)")
});

/// Generic `LETTERS[-_ ]DIGITS`.
static GENERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?:^|[^A-Z])([A-Z]{2,10})[-_ ]?(\d{2,6})(?:\D|$)"));

/// Canonical shapes, used to classify an already normalized string.
static CANONICAL_SPECIAL_A_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^FC2-PPV-\d{5,8}$"));
static CANONICAL_SPECIAL_B_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^(?:HEYZO-\d{4}|\d{6}-\d{2,3})$"));
static CANONICAL_STANDARD_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[A-Z]{2,10}-\d{2,6}$"));

/// Result of a family match, before studio lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FamilyMatch {
    pub normalized: String,
    pub series: String,
    pub number: String,
    pub format: Format,
}

impl FamilyMatch {
    fn new(series: &str, number: String, normalized: String, format: Format) -> Self {
        Self {
            normalized,
            series: series.to_string(),
            number,
            format,
        }
    }
}

/// Trims leading zeros of a number down to at least three digits (`00177` gives `177`, `012` stays).
fn trim_number(number: &str) -> String {
    let mut trimmed = number;
    while trimmed.len() > 3 && trimmed.starts_with('0') {
        trimmed = &trimmed[1..];
    }
    trimmed.to_string()
}

/// Tries every family in order against an upper-cased candidate.
pub(crate) fn match_families(candidate: &str) -> Option<FamilyMatch> {
    if let Some(caps) = FC2_RE.captures(candidate) {
        let number = caps[1].to_string();
        let normalized = format!("FC2-PPV-{number}");
        return Some(FamilyMatch::new("FC2-PPV", number, normalized, Format::SpecialA));
    }

    if let Some(caps) = HEYZO_RE.captures(candidate) {
        let number = caps[1].to_string();
        let normalized = format!("HEYZO-{number}");
        return Some(FamilyMatch::new("HEYZO", number, normalized, Format::SpecialB));
    }

    if let Some(caps) = DATE_CODE_RE.captures(candidate) {
        let date = &caps[1];
        let number = caps[2].to_string();
        let normalized = format!("{date}-{number}");
        return Some(FamilyMatch::new(date, number, normalized, Format::SpecialB));
    }

    if let Some(caps) = CONTENT_ID_RE.captures(candidate) {
        let series = &caps[1];
        let number = trim_number(&caps[2]);
        let normalized = format!("{series}-{number}");
        return Some(FamilyMatch::new(series, number, normalized, Format::ContentId));
    }

    if let Some(caps) = GENERIC_RE.captures(candidate) {
        let series = &caps[1];
        let number = trim_number(&caps[2]);
        let normalized = format!("{series}-{number}");
        return Some(FamilyMatch::new(series, number, normalized, Format::Standard));
    }

    None
}

/// Classifies an already normalized identifier string.
///
/// Content ids normalize to the standard shape, so this never returns
/// [`Format::ContentId`]; strings of no known shape are [`Format::Unknown`].
#[must_use]
pub fn classify(normalized: &str) -> Format {
    if CANONICAL_SPECIAL_A_RE.is_match(normalized) {
        Format::SpecialA
    } else if CANONICAL_SPECIAL_B_RE.is_match(normalized) {
        Format::SpecialB
    } else if CANONICAL_STANDARD_RE.is_match(normalized) {
        Format::Standard
    } else {
        Format::Unknown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Family Tests ====================

    #[test]
    fn test_fc2_variants() {
        for candidate in ["FC2-PPV-1234567", "FC2PPV 1234567", "FC2_1234567", "[X] FC2-PPV-1234567"] {
            let m = match_families(candidate).unwrap();
            assert_eq!(m.normalized, "FC2-PPV-1234567", "candidate {candidate}");
            assert_eq!(m.format, Format::SpecialA);
        }
    }

    #[test]
    fn test_heyzo() {
        let m = match_families("HEYZO_HD_2033").unwrap();
        assert_eq!(m.normalized, "HEYZO-2033");
        assert_eq!(m.format, Format::SpecialB);
    }

    #[test]
    fn test_date_coded_wins_over_generic() {
        let m = match_families("CARIB-010124-001").unwrap();
        assert_eq!(m.normalized, "010124-001");
        assert_eq!(m.series, "010124");
        assert_eq!(m.number, "001");
    }

    #[test]
    fn test_content_id() {
        let m = match_families("118ABP00123").unwrap();
        assert_eq!(m.normalized, "ABP-123");
        assert_eq!(m.format, Format::ContentId);

        let m = match_families("IPX00177").unwrap();
        assert_eq!(m.normalized, "IPX-177");
    }

    #[test]
    fn test_generic_separators() {
        for candidate in ["IPX-177", "IPX_177", "IPX 177", "IPX177", "[SITE] IPX-177 "] {
            assert_eq!(match_families(candidate).unwrap().normalized, "IPX-177");
        }
    }

    #[test]
    fn test_generic_trims_padding() {
        assert_eq!(match_families("SSIS-0012").unwrap().normalized, "SSIS-012");
        assert_eq!(match_families("SSIS-012").unwrap().normalized, "SSIS-012");
    }

    #[test]
    fn test_no_match() {
        assert!(match_families("HOLIDAY").is_none());
        assert!(match_families("X-1").is_none());
    }

    // ==================== Classify Tests ====================

    #[test]
    fn test_classify_canonical_shapes() {
        assert_eq!(classify("FC2-PPV-1234567"), Format::SpecialA);
        assert_eq!(classify("HEYZO-1234"), Format::SpecialB);
        assert_eq!(classify("010124-001"), Format::SpecialB);
        assert_eq!(classify("IPX-177"), Format::Standard);
        assert_eq!(classify("hello world"), Format::Unknown);
    }
}
