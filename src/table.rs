//! Row/table model and table extraction
//!
//! CLI output comes in three tabular shapes (key/value maps, tab-delimited
//! machine output, and fixed-width listings with a header line) plus plain
//! line output. Extraction keeps, for every row, the index of the raw line
//! it came from so matched rows can be mapped back to literal text.

use regex::Regex;
use crate::command::{Layout, Shape};

/// Returns true for lines that take no part in structural comparison:
/// blank lines and `#` comments.
pub fn is_ignorable(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

/// A compiled pattern, anchored at the start of the text it is matched against.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `source` so that it only matches at the start of the input.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern text as written (without the anchor).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// One table cell: either literal text or a pattern (expected side only).
#[derive(Debug, Clone)]
pub enum Cell {
    Literal(String),
    Pattern(Pattern),
}

impl Cell {
    /// Check an actual cell value against this (expected) cell.
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            Cell::Literal(s) => s == actual,
            Cell::Pattern(p) => p.is_match(actual),
        }
    }

    /// Literal text of the cell, `None` once it has been turned into a pattern.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Cell::Literal(s) => Some(s),
            Cell::Pattern(_) => None,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Cell::Pattern(_))
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Literal(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Literal(s)
    }
}

/// A table row: cells plus the index of the raw line it was extracted from
#[derive(Debug, Clone)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub line: usize,
}

impl Row {
    pub fn new(cells: Vec<Cell>, line: usize) -> Self {
        Self { cells, line }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Literal text of column `col`, if present and still literal.
    pub fn text(&self, col: usize) -> Option<&str> {
        self.cells.get(col).and_then(Cell::literal)
    }

    /// Check an actual row against this (expected) row: same length and
    /// every cell matches.
    pub fn accepts(&self, actual: &Row) -> bool {
        if self.cells.len() != actual.cells.len() {
            return false;
        }
        self.cells.iter().zip(&actual.cells).all(|(expected, got)| match got {
            Cell::Literal(text) => expected.matches(text),
            // actual rows never carry patterns
            Cell::Pattern(_) => false,
        })
    }
}

/// An ordered sequence of rows
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Extract a table from raw output lines (line terminators already removed).
pub fn extract(lines: &[String], shape: Shape) -> Table {
    let rows = match shape {
        Shape::Map => extract_map(lines),
        Shape::Table(Layout::Delimited) => extract_delimited(lines),
        Shape::Table(Layout::FixedWidth) => extract_fixed_width(lines),
        Shape::Lines => lines
            .iter()
            .enumerate()
            .map(|(i, line)| Row::new(vec![Cell::from(line.as_str())], i))
            .collect(),
    };
    Table { rows }
}

fn significant(lines: &[String]) -> impl Iterator<Item = (usize, &str)> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !is_ignorable(line))
        .map(|(i, line)| (i, line.as_str()))
}

fn extract_map(lines: &[String]) -> Vec<Row> {
    significant(lines)
        .map(|(i, line)| {
            let cells = match line.split_once(':') {
                Some((key, value)) => vec![Cell::from(key.trim()), Cell::from(value.trim())],
                None => vec![Cell::from(line.trim())],
            };
            Row::new(cells, i)
        })
        .collect()
}

fn extract_delimited(lines: &[String]) -> Vec<Row> {
    significant(lines)
        .map(|(i, line)| Row::new(line.split('\t').map(Cell::from).collect(), i))
        .collect()
}

fn extract_fixed_width(lines: &[String]) -> Vec<Row> {
    let mut rows = significant(lines).peekable();
    let header: Vec<char> = match rows.peek() {
        Some((_, line)) => line.chars().collect(),
        None => return Vec::new(),
    };
    let offsets = column_offsets(&header);

    rows.map(|(i, line)| {
        let chars: Vec<char> = line.chars().collect();
        let cells = offsets
            .iter()
            .enumerate()
            .map(|(col, &offset)| {
                if offset >= chars.len() {
                    return Cell::Literal(String::new());
                }
                let end = offsets
                    .get(col + 1)
                    .map_or(chars.len(), |&next| next.min(chars.len()));
                let text: String = chars[offset..end.max(offset)].iter().collect();
                Cell::Literal(text.trim().to_string())
            })
            .collect();
        Row::new(cells, i)
    })
    .collect()
}

/// Character offset of each header token. The search for a token starts one
/// past the previous token's offset, since some header names are substrings
/// of others.
fn column_offsets(header: &[char]) -> Vec<usize> {
    let line: String = header.iter().collect();
    let mut offsets: Vec<usize> = Vec::new();
    for token in line.split_whitespace() {
        let needle: Vec<char> = token.chars().collect();
        let from = offsets.last().map_or(0, |&o| o + 1);
        if let Some(pos) = find_chars(header, &needle, from) {
            offsets.push(pos);
        }
    }
    offsets
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}
