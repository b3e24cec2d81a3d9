//! Compare command: diff two field documents.

use anyhow::{Context, Result};
use metascraper_core::compare::load_fields;
use metascraper_core::{Comparator, ComparisonResult, EngineConfig};

use crate::ProcessExit;
use crate::cli::CompareArgs;

/// Exits with `Partial` when the match rate is below `--min-rate`.
pub fn run_compare_command(args: &CompareArgs, config: &EngineConfig) -> Result<ProcessExit> {
    let baseline = load_fields(&args.baseline).context("could not read baseline")?;
    let current = load_fields(&args.current).context("could not read current document")?;

    let mut rules = config.compare.clone();
    rules.strict |= args.strict;
    rules.case_insensitive |= args.ignore_case;
    let result = Comparator::new(rules).compare_fields(&baseline, &current);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_report(&result));
    }

    Ok(if result.match_rate + f64::EPSILON >= args.min_rate {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    })
}

pub(crate) fn render_report(result: &ComparisonResult) -> String {
    let mut out = String::new();
    for field in &result.field_results {
        let mark = if field.matched { "ok  " } else { "DIFF" };
        out.push_str(&format!("{mark} {:<16} {:<8}", field.field, field.category));
        if !field.detail.is_empty() {
            out.push_str(&format!(" {}", field.detail));
        }
        out.push('\n');
    }
    out.push_str(&format!("match rate: {:.1}%\n", result.match_rate));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use metascraper_core::{FieldCategory, FieldResult};

    use super::*;

    #[test]
    fn test_render_report_marks_mismatches() {
        let result = ComparisonResult {
            match_rate: 50.0,
            field_results: vec![
                FieldResult {
                    field: "title".to_string(),
                    matched: true,
                    category: FieldCategory::Text,
                    detail: String::new(),
                },
                FieldResult {
                    field: "tags".to_string(),
                    matched: false,
                    category: FieldCategory::Set,
                    detail: "missing: Drama".to_string(),
                },
            ],
        };
        let report = render_report(&result);
        assert!(report.contains("ok   title"));
        assert!(report.contains("DIFF tags"));
        assert!(report.contains("missing: Drama"));
        assert!(report.ends_with("match rate: 50.0%\n"));
    }
}
