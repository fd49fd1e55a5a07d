//! Command classification
//!
//! A directive's command text is classified exactly once, when the
//! directive is parsed. Everything downstream (table extraction, rule
//! selection, matching mode) branches on the resulting [`Shape`].

use std::path::PathBuf;
use std::sync::OnceLock;
use regex::Regex;
use crate::error::TranscriptError;

/// How the columns of a tabular listing are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Machine-readable output, cells separated by tabs
    Delimited,
    /// Human-readable listing aligned under a header line
    FixedWidth,
}

/// The output shape a CLI command produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `key: value` lines
    Map,
    /// A listing with columns
    Table(Layout),
    /// Free-form lines, compared one line per row
    Lines,
}

impl Shape {
    /// Classify the CLI arguments (program name already removed).
    pub fn classify(args: &[String]) -> Self {
        let text = args.join(" ");
        if is_map(&text) {
            return Shape::Map;
        }
        if text.starts_with("list") || text.starts_with("dump zone") || text.starts_with("history") {
            if text.starts_with("dump zone") || args.iter().any(|a| a == "-H") {
                return Shape::Table(Layout::Delimited);
            }
            return Shape::Table(Layout::FixedWidth);
        }
        Shape::Lines
    }
}

fn is_map(text: &str) -> bool {
    static GET_OR_MARK: OnceLock<Regex> = OnceLock::new();
    static CREATE_FROM: OnceLock<Regex> = OnceLock::new();
    let get_or_mark = GET_OR_MARK.get_or_init(|| {
        Regex::new(r"\b(get|mark) (ip|delegation)\b").expect("static regex")
    });
    let create_from = CREATE_FROM.get_or_init(|| {
        Regex::new(r"^create rr .* from\b").expect("static regex")
    });
    text.starts_with("show")
        || text.starts_with("modify rr")
        || get_or_mark.is_match(text)
        || create_from.is_match(text)
}

/// A command for the CLI under test
#[derive(Debug, Clone)]
pub struct CliCommand {
    /// The directive line without the marker, e.g. `ndcli list zones`
    pub line: String,
    /// Arguments after the program name, with any redirection removed
    pub args: Vec<String>,
    /// Target of a `> file` redirection
    pub redirect: Option<PathBuf>,
    /// Heredoc input fed to stdin
    pub input: Option<String>,
    /// Output shape, computed once from the arguments
    pub shape: Shape,
}

impl CliCommand {
    /// Parse a command line whose first word is the CLI program.
    pub fn parse(line: &str, input: Option<String>) -> Result<Self, TranscriptError> {
        let mut words = split_words(line)?;
        if words.is_empty() {
            return Err(TranscriptError::syntax("empty command"));
        }
        words.remove(0);

        let mut redirect = None;
        if let Some(idx) = words.iter().position(|w| w == ">") {
            let target = words.get(idx + 1).ok_or_else(|| {
                TranscriptError::syntax("missing redirection target after '>'")
            })?;
            redirect = Some(PathBuf::from(target));
            words.truncate(idx);
        }

        let shape = Shape::classify(&words);
        Ok(Self {
            line: line.to_string(),
            args: words,
            redirect,
            input,
            shape,
        })
    }

    /// The arguments joined back with single spaces; rule patterns match this.
    pub fn text(&self) -> String {
        self.args.join(" ")
    }

    /// True for commands that change zone data and therefore propagate to
    /// the export side channel.
    pub fn mutates_zone(&self) -> bool {
        let verb = self.args.first().map(String::as_str);
        let object = self.args.get(1).map(String::as_str).unwrap_or("");
        matches!(verb, Some("create") | Some("delete") | Some("modify"))
            && (object == "rr" || object.starts_with("zone"))
    }
}

/// A command run through the system shell for its side effects
#[derive(Debug, Clone)]
pub struct ShellCommand {
    /// The raw command line without the marker
    pub line: String,
    /// Heredoc input fed to stdin
    pub input: Option<String>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>, input: Option<String>) -> Self {
        Self {
            line: line.into(),
            input,
        }
    }

    /// Resolver queries return records in no guaranteed order, so their
    /// output is compared sorted. Any word naming `dig` or `drill`, by
    /// itself or as the last path component, makes the line a query.
    pub fn is_resolver_query(&self) -> bool {
        self.line.split_whitespace().any(|w| {
            let name = w.rsplit('/').next().unwrap_or(w);
            name == "dig" || name == "drill"
        })
    }
}

/// Split a command line into words the way a POSIX shell would, honoring
/// single quotes, double quotes and backslash escapes.
pub fn split_words(line: &str) -> Result<Vec<String>, TranscriptError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(TranscriptError::syntax("unterminated quoted argument")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(TranscriptError::syntax("unterminated quoted argument")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(TranscriptError::syntax("unterminated quoted argument")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(TranscriptError::syntax("trailing backslash")),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(text: &str) -> Vec<String> {
        split_words(text).unwrap()
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(Shape::classify(&args("show zone a.de")), Shape::Map);
        assert_eq!(Shape::classify(&args("modify rr a.de. A 1.2.3.4")), Shape::Map);
        assert_eq!(Shape::classify(&args("get ip 10.0.0.0/24")), Shape::Map);
        assert_eq!(Shape::classify(&args("mark delegation 10.0.0.0/26")), Shape::Map);
        assert_eq!(Shape::classify(&args("create rr a.de. from 10.0.0.1")), Shape::Map);
        assert_eq!(Shape::classify(&args("list zones")), Shape::Table(Layout::FixedWidth));
        assert_eq!(Shape::classify(&args("history zone a.de")), Shape::Table(Layout::FixedWidth));
        assert_eq!(Shape::classify(&args("list zones -H")), Shape::Table(Layout::Delimited));
        assert_eq!(Shape::classify(&args("dump zone a.de")), Shape::Table(Layout::Delimited));
        assert_eq!(Shape::classify(&args("create zone a.de")), Shape::Lines);
        assert_eq!(Shape::classify(&args("delete rr a.de. A 1.2.3.4")), Shape::Lines);
    }

    #[test]
    fn test_split_words_quotes() {
        assert_eq!(args("a 'b c' \"d \\\"e\\\"\" f\\ g"), vec!["a", "b c", "d \"e\"", "f g"]);
        assert_eq!(args("x '' y"), vec!["x", "", "y"]);
        assert!(split_words("echo 'oops").is_err());
        assert!(split_words("echo \"oops").is_err());
    }

    #[test]
    fn test_cli_command_redirect() {
        let cmd = CliCommand::parse("ndcli dump zone a.de > zone.txt", None).unwrap();
        assert_eq!(cmd.args, vec!["dump", "zone", "a.de"]);
        assert_eq!(cmd.redirect, Some(PathBuf::from("zone.txt")));
        assert_eq!(cmd.shape, Shape::Table(Layout::Delimited));
        assert!(CliCommand::parse("ndcli dump zone a.de >", None).is_err());
    }

    #[test]
    fn test_mutates_zone() {
        let yes = ["ndcli create rr a.de. A 1.2.3.4", "ndcli delete zone a.de", "ndcli modify zone-profile p set ttl 10"];
        for line in yes {
            assert!(CliCommand::parse(line, None).unwrap().mutates_zone(), "{}", line);
        }
        let no = ["ndcli list zones", "ndcli create pool p", "ndcli show zone a.de"];
        for line in no {
            assert!(!CliCommand::parse(line, None).unwrap().mutates_zone(), "{}", line);
        }
    }

    #[test]
    fn test_resolver_query() {
        assert!(ShellCommand::new("dig @127.1.1.1 a.de AXFR +nocmd", None).is_resolver_query());
        assert!(!ShellCommand::new("cat digest.txt", None).is_resolver_query());
        assert!(ShellCommand::new("/usr/bin/dig @127.1.1.1 a.de SOA", None).is_resolver_query());
        assert!(ShellCommand::new("timeout 5 ./drill -Q a.de", None).is_resolver_query());
        assert!(!ShellCommand::new("ls /srv/digs", None).is_resolver_query());
    }
}
