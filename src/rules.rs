//! Regex annotation of expected tables
//!
//! The server emits values the transcript cannot know in advance: creation
//! timestamps, generated key names, SOA serials, DS digests. Before
//! matching, cells holding such values in the *expected* table are replaced
//! by patterns. Which cells is decided by a rule table declared as data
//! (`builtin_rules.toml`, optionally extended from a user file), so a new
//! non-deterministic field is one more rule rather than new matching code.

use std::path::Path;
use regex::Regex;
use serde::Deserialize;
use crate::command::{CliCommand, Shape};
use crate::error::{ErrorKind, TranscriptError};
use crate::table::{Cell, Pattern, Row, Table};

const BUILTIN_RULES: &str = include_str!("builtin_rules.toml");

/// Which command shape a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Map,
    Table,
    Lines,
}

impl Scope {
    fn covers(self, shape: Shape) -> bool {
        matches!(
            (self, shape),
            (Scope::Map, Shape::Map) | (Scope::Table, Shape::Table(_)) | (Scope::Lines, Shape::Lines)
        )
    }
}

/// Row filter for column rewrites. Negative columns count from the end.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Leave the first row (the listing header) alone
    SkipHeader,
    CellEquals { column: isize, value: String },
    CellNotEquals { column: isize, value: String },
    CellStartsWith { column: isize, prefix: String },
}

/// A single cell rewrite, as declared
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rewrite {
    /// For `key: value` rows whose key is listed, replace the value.
    MapValue { keys: Vec<String>, pattern: String },
    /// Replace one column of every row satisfying `when`.
    Column {
        column: isize,
        pattern: String,
        #[serde(default)]
        when: Condition,
    },
    /// When one of `type_columns` holds the record type `rtype`, replace the
    /// record data in the following column. With `seed_tokens > 0` the first
    /// tokens of the recorded data are kept literally in front of `pattern`.
    RecordData {
        type_columns: Vec<usize>,
        rtype: String,
        pattern: String,
        #[serde(default)]
        seed_tokens: usize,
    },
    /// Search each template in column 0; the first one found replaces the cell.
    LineTemplate { patterns: Vec<String> },
}

/// A rule as declared in a rules file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub scope: Scope,
    /// Regex searched in the command's argument text
    pub command: String,
    #[serde(default, rename = "rewrite")]
    pub rewrites: Vec<Rewrite>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleSpec>,
}

enum CompiledRewrite {
    MapValue { keys: Vec<String>, pattern: Pattern },
    Column { column: isize, pattern: Pattern, when: Condition },
    RecordData { type_columns: Vec<usize>, rtype: String, pattern: String, seed_tokens: usize },
    LineTemplate { templates: Vec<(Regex, Pattern)> },
}

struct Rule {
    name: String,
    scope: Scope,
    command: Regex,
    rewrites: Vec<CompiledRewrite>,
}

/// The compiled rule table
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// An empty rule table: expected tables stay fully literal.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in rules.
    pub fn builtin() -> Result<Self, TranscriptError> {
        Self::from_toml(BUILTIN_RULES)
    }

    /// Parse and compile rules from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, TranscriptError> {
        let file: RuleFile = toml::from_str(text)
            .map_err(|e| TranscriptError::new(ErrorKind::Config, format!("invalid rules: {}", e)))?;
        let rules = file.rules.into_iter().map(compile_rule).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Load rules from a TOML file.
    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TranscriptError::new(ErrorKind::Config, format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml(&text).map_err(|e| {
            TranscriptError::new(e.kind, format!("{}: {}", path.display(), e.message))
        })
    }

    /// Append the rules of `other` after this table's rules.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of the rules that apply to `command`.
    pub fn matching(&self, command: &CliCommand) -> Vec<&str> {
        let text = command.text();
        self.rules
            .iter()
            .filter(|r| r.scope.covers(command.shape) && r.command.is_match(&text))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Rewrite cells of an expected table into patterns. Rules stack, in
    /// declaration order.
    pub fn annotate(&self, table: &mut Table, command: &CliCommand) {
        let text = command.text();
        for rule in &self.rules {
            if !rule.scope.covers(command.shape) || !rule.command.is_match(&text) {
                continue;
            }
            tracing::trace!(rule = %rule.name, command = %text, "annotating expected table");
            for rewrite in &rule.rewrites {
                for (index, row) in table.rows.iter_mut().enumerate() {
                    apply(rewrite, index, row);
                }
            }
        }
    }
}

fn compile_rule(spec: RuleSpec) -> Result<Rule, TranscriptError> {
    let command = Regex::new(&spec.command).map_err(|e| TranscriptError::pattern(&spec.command, e))?;
    let rewrites = spec
        .rewrites
        .into_iter()
        .map(compile_rewrite)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TranscriptError::new(e.kind, format!("rule {:?}: {}", spec.name, e.message)))?;
    Ok(Rule {
        name: spec.name,
        scope: spec.scope,
        command,
        rewrites,
    })
}

fn compile_pattern(source: &str) -> Result<Pattern, TranscriptError> {
    Pattern::new(source).map_err(|e| TranscriptError::pattern(source, e))
}

fn compile_rewrite(rewrite: Rewrite) -> Result<CompiledRewrite, TranscriptError> {
    Ok(match rewrite {
        Rewrite::MapValue { keys, pattern } => CompiledRewrite::MapValue {
            keys,
            pattern: compile_pattern(&pattern)?,
        },
        Rewrite::Column { column, pattern, when } => CompiledRewrite::Column {
            column,
            pattern: compile_pattern(&pattern)?,
            when,
        },
        Rewrite::RecordData { type_columns, rtype, pattern, seed_tokens } => {
            // the seeded form is built per row; check the tail up front
            compile_pattern(&pattern)?;
            CompiledRewrite::RecordData { type_columns, rtype, pattern, seed_tokens }
        }
        Rewrite::LineTemplate { patterns } => {
            let templates = patterns
                .iter()
                .map(|p| {
                    let search = Regex::new(p).map_err(|e| TranscriptError::pattern(p, e))?;
                    Ok((search, compile_pattern(p)?))
                })
                .collect::<Result<Vec<_>, TranscriptError>>()?;
            CompiledRewrite::LineTemplate { templates }
        }
    })
}

fn resolve(column: isize, len: usize) -> Option<usize> {
    if column >= 0 {
        let col = column as usize;
        (col < len).then_some(col)
    } else {
        len.checked_sub(column.unsigned_abs())
    }
}

fn holds(when: &Condition, index: usize, row: &Row) -> bool {
    let cell = |column: isize| resolve(column, row.len()).and_then(|c| row.text(c));
    match when {
        Condition::Always => true,
        Condition::SkipHeader => index > 0,
        Condition::CellEquals { column, value } => cell(*column) == Some(value.as_str()),
        Condition::CellNotEquals { column, value } => {
            cell(*column).map_or(false, |text| text != value)
        }
        Condition::CellStartsWith { column, prefix } => {
            cell(*column).map_or(false, |text| text.starts_with(prefix.as_str()))
        }
    }
}

fn apply(rewrite: &CompiledRewrite, index: usize, row: &mut Row) {
    match rewrite {
        CompiledRewrite::MapValue { keys, pattern } => {
            if row.len() == 2 && row.text(0).map_or(false, |k| keys.iter().any(|key| key == k)) {
                row.cells[1] = Cell::Pattern(pattern.clone());
            }
        }
        CompiledRewrite::Column { column, pattern, when } => {
            if !holds(when, index, row) {
                return;
            }
            if let Some(col) = resolve(*column, row.len()) {
                row.cells[col] = Cell::Pattern(pattern.clone());
            }
        }
        CompiledRewrite::RecordData { type_columns, rtype, pattern, seed_tokens } => {
            for &col in type_columns {
                if col + 1 >= row.len() || row.text(col) != Some(rtype.as_str()) {
                    continue;
                }
                let source = match seed(row.text(col + 1), *seed_tokens) {
                    Some(prefix) => format!("{}{}", prefix, pattern),
                    None => continue,
                };
                match Pattern::new(&source) {
                    Ok(p) => row.cells[col + 1] = Cell::Pattern(p),
                    Err(e) => tracing::warn!(pattern = %source, error = %e, "skipping record data rewrite"),
                }
            }
        }
        CompiledRewrite::LineTemplate { templates } => {
            let Some(text) = row.text(0) else { return };
            if let Some((_, pattern)) = templates.iter().find(|(search, _)| search.is_match(text)) {
                row.cells[0] = Cell::Pattern(pattern.clone());
            }
        }
    }
}

/// Literal prefix made of the first `tokens` words of the recorded data,
/// `None` if the data is already a pattern or too short.
fn seed(data: Option<&str>, tokens: usize) -> Option<String> {
    if tokens == 0 {
        return Some(String::new());
    }
    let words: Vec<&str> = data?.split_whitespace().take(tokens).collect();
    if words.len() < tokens {
        return None;
    }
    let mut prefix = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join(" ");
    prefix.push(' ');
    Some(prefix)
}
