//! Row matching and line comparison
//!
//! Both comparators produce the lines to write into the rewritten transcript:
//! wherever actual output is accepted, the *expected* text is written, so a
//! passing directive reproduces its recorded block byte for byte and a
//! failing one shows up as a plain diff against the recorded transcript.

use crate::table::{Pattern, Table};

/// Suffix marking an expected line as a regular expression
pub const REGEX_SUFFIX: &str = " re";

/// Outcome of matching an actual table against an expected one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// For each actual row, the index of the expected row it was matched to
    pub pairs: Vec<Option<usize>>,
    /// The reconciled output lines, terminators included
    pub lines: Vec<String>,
}

impl MatchResult {
    /// True when every actual row found an expected row and every expected
    /// row was used.
    pub fn is_complete(&self, expected_rows: usize) -> bool {
        self.pairs.iter().all(Option::is_some) && self.pairs.len() == expected_rows
    }
}

/// Match actual rows to expected rows, tolerating reordering.
///
/// Greedy by arrival: each actual row, in output order, takes the first
/// expected row (in declaration order) that is still free and accepts it.
/// There is no backtracking, which keeps the result deterministic when
/// several expected rows could match the same actual row.
///
/// `actual_raw` holds the actual output lines without terminators;
/// `expected_raw` the recorded lines with their terminators.
pub fn match_rows(
    actual: &Table,
    expected: &Table,
    actual_raw: &[String],
    expected_raw: &[String],
) -> MatchResult {
    let mut taken = vec![false; expected.rows.len()];
    let mut pairs = Vec::with_capacity(actual.rows.len());

    for row in &actual.rows {
        let hit = expected
            .rows
            .iter()
            .enumerate()
            .find(|(i, candidate)| !taken[*i] && candidate.accepts(row))
            .map(|(i, _)| i);
        if let Some(i) = hit {
            taken[i] = true;
        }
        pairs.push(hit);
    }

    // matched expected lines are written in declaration order, into the
    // positions of the matched actual lines
    let mut matched_lines: Vec<usize> = pairs
        .iter()
        .flatten()
        .map(|&i| expected.rows[i].line)
        .collect();
    matched_lines.sort_unstable();
    let mut replacements = matched_lines.into_iter().map(|line| expected_raw[line].clone());

    let mut matched_at = vec![false; actual_raw.len()];
    for (row, pair) in actual.rows.iter().zip(&pairs) {
        if pair.is_some() && row.line < matched_at.len() {
            matched_at[row.line] = true;
        }
    }

    let lines = actual_raw
        .iter()
        .zip(&matched_at)
        .map(|(raw, &matched)| {
            if matched {
                if let Some(expected_line) = replacements.next() {
                    return expected_line;
                }
            }
            format!("{}\n", raw)
        })
        .collect();

    MatchResult { pairs, lines }
}

/// Compare shell output line by line.
///
/// The shorter side is padded with empty lines. Expected lines ending in
/// `" re"` are patterns anchored at the start of the actual line; a match
/// keeps the expected text. Returns the output lines (with terminators) and
/// whether every line matched.
pub fn compare_lines(actual: &[String], expected: &[String], sort: bool) -> (Vec<String>, bool) {
    let mut actual: Vec<&str> = actual.iter().map(String::as_str).collect();
    let mut expected: Vec<&str> = expected
        .iter()
        .map(|l| l.strip_suffix('\n').unwrap_or(l))
        .collect();
    if sort {
        actual.sort_unstable();
        expected.sort_unstable();
    }

    let mut passed = true;
    let mut lines = Vec::with_capacity(actual.len().max(expected.len()));
    for i in 0..actual.len().max(expected.len()) {
        let got = actual.get(i).copied().unwrap_or("");
        let want = expected.get(i).copied().unwrap_or("");
        if let Some(source) = want.strip_suffix(REGEX_SUFFIX) {
            let accepted = match Pattern::new(source) {
                Ok(p) => p.is_match(got),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "invalid expected pattern");
                    false
                }
            };
            if accepted {
                lines.push(format!("{}\n", want));
                continue;
            }
        } else if got == want {
            lines.push(format!("{}\n", got));
            continue;
        }
        passed = false;
        lines.push(format!("{}\n", got));
    }
    (lines, passed)
}
