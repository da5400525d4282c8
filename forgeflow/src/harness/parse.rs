//! Summary parsers for pytest, Jest and Julia's `Test` output.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Case counts recovered from runner output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedCounts {
    /// Passed cases.
    pub passed: u32,
    /// Failed cases.
    pub failed: u32,
    /// Errored cases.
    pub errored: u32,
    /// Skipped (or broken/pending) cases.
    pub skipped: u32,
    /// Whether a summary line was found at all.
    pub summary_found: bool,
}

impl ParsedCounts {
    /// Total cases the runner reported.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.passed + self.failed + self.errored + self.skipped
    }

    fn found() -> Self {
        Self {
            summary_found: true,
            ..Self::default()
        }
    }
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn last_match<'t>(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    text: &'t str,
) -> Option<Captures<'t>> {
    compiled(cell, pattern)?.captures_iter(text).last()
}

/// `(count, word)` pairs such as `3 passed` in a summary line.
fn counted_words(line: &str) -> Vec<(u32, &str)> {
    static COUNT: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&COUNT, r"(\d+) ([a-z]+)").map_or_else(Vec::new, |re| {
        re.captures_iter(line)
            .filter_map(|cap| {
                let n = cap.get(1)?.as_str().parse().ok()?;
                Some((n, cap.get(2)?.as_str()))
            })
            .collect()
    })
}

/// Parses pytest's final `=== N passed, M failed in Xs ===` line.
#[must_use]
pub fn parse_pytest(output: &str) -> ParsedCounts {
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(line) = last_match(&SUMMARY, r"(?m)^=+ (.*\bin [\d.]+s.*?) =+\s*$", output)
        .and_then(|c| c.get(1))
    else {
        return ParsedCounts::default();
    };

    let mut counts = ParsedCounts::found();
    for (n, word) in counted_words(line.as_str()) {
        match word {
            "passed" | "xpassed" => counts.passed += n,
            "failed" => counts.failed += n,
            "error" | "errors" => counts.errored += n,
            "skipped" | "xfailed" => counts.skipped += n,
            _ => {}
        }
    }
    counts
}

/// Parses Jest's `Tests: 1 failed, 4 passed, 5 total` line.
#[must_use]
pub fn parse_jest(output: &str) -> ParsedCounts {
    static TESTS: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(line) = last_match(&TESTS, r"(?m)^Tests:\s+(.*?)\s*$", output).and_then(|c| c.get(1))
    else {
        return ParsedCounts::default();
    };

    let mut counts = ParsedCounts::found();
    for (n, word) in counted_words(line.as_str()) {
        match word {
            "passed" => counts.passed += n,
            "failed" => counts.failed += n,
            "skipped" | "todo" | "pending" => counts.skipped += n,
            _ => {}
        }
    }
    counts
}

/// Parses Julia `Test` output.
///
/// Failing runs end with `Some tests did not pass: ...`; passing runs only
/// print the `Test Summary:` table, whose columns vary with the results.
#[must_use]
pub fn parse_julia(output: &str) -> ParsedCounts {
    static FAILURE: OnceLock<Option<Regex>> = OnceLock::new();
    if let Some(cap) = last_match(
        &FAILURE,
        r"Some tests did not pass: (\d+) passed, (\d+) failed, (\d+) errored, (\d+) broken",
        output,
    ) {
        let n = |i: usize| {
            cap.get(i)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };
        return ParsedCounts {
            passed: n(1),
            failed: n(2),
            errored: n(3),
            skipped: n(4),
            summary_found: true,
        };
    }

    let lines: Vec<&str> = output.lines().collect();
    let Some(idx) = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with("Test Summary:"))
    else {
        return ParsedCounts::default();
    };
    let Some(values_line) = lines.get(idx + 1) else {
        return ParsedCounts::default();
    };

    let cells = |line: &str| -> Vec<String> {
        line.split_once('|')
            .map(|(_, rest)| rest.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    };
    let columns = cells(lines[idx]);
    let values = cells(values_line);

    let mut counts = ParsedCounts::found();
    for (column, value) in columns.iter().zip(values.iter()) {
        let Ok(n) = value.parse::<u32>() else {
            continue;
        };
        match column.as_str() {
            "Pass" => counts.passed = n,
            "Fail" => counts.failed = n,
            "Error" => counts.errored = n,
            "Broken" => counts.skipped = n,
            _ => {}
        }
    }
    counts
}
