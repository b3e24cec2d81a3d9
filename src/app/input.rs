//! Positional arguments or piped stdin, one item per line.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};

/// Returns `args` when non-empty, otherwise the non-blank lines of piped stdin.
pub(crate) fn collect_inputs(args: &[String]) -> Result<Vec<String>> {
    if !args.is_empty() {
        return Ok(args.to_vec());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    Ok(split_lines(&buffer))
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
