//! Transcript parser
//!
//! A transcript is a recorded session:
//! - `$ ` at line start marks a directive (a command to run)
//! - `$ cat <<WORD | cmd` feeds the following lines, up to a line `WORD`,
//!   to `cmd` on stdin
//! - every other line up to the next directive is the expected output
//! - blank lines and `#` comments are ignorable; those trailing a block
//!   belong to whatever follows, not to the block
//!
//! The parser is a cursor over the remaining lines. Lines keep their
//! terminators so the rewritten transcript can reproduce the input byte
//! for byte.

use std::collections::VecDeque;
use std::sync::OnceLock;
use regex::Regex;
use crate::command::{CliCommand, ShellCommand};
use crate::error::TranscriptError;
use crate::table::is_ignorable;

/// Prefix of directive lines
pub const DIRECTIVE_MARKER: &str = "$ ";

/// One parsed unit of a transcript
#[derive(Debug, Clone)]
pub enum Directive {
    /// A command for the CLI under test
    Command(CliCommand),
    /// A shell command run for its side effects
    Shell(ShellCommand),
    /// A comment, blank or stray line, echoed as is
    Text,
}

/// A directive together with its surrounding transcript text
#[derive(Debug, Clone)]
pub struct Step {
    /// Line number (1-based) of the first echoed line
    pub line_number: usize,
    /// Lines copied verbatim into the output: the directive line and any
    /// heredoc input including its terminator
    pub echo: Vec<String>,
    pub directive: Directive,
    /// The expected block, raw lines with terminators
    pub expected: Vec<String>,
}

/// Cursor over the lines of a transcript that have not been consumed yet
pub struct Transcript {
    remaining: VecDeque<(usize, String)>,
    cli_name: String,
}

impl Transcript {
    /// Split `text` into lines. Directives whose first word is `cli_name`
    /// are CLI commands, all others are shell commands.
    pub fn new(text: &str, cli_name: impl Into<String>) -> Self {
        Self {
            remaining: text
                .split_inclusive('\n')
                .enumerate()
                .map(|(i, line)| (i + 1, line.to_string()))
                .collect(),
            cli_name: cli_name.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Take the next step off the cursor.
    pub fn next_step(&mut self) -> Option<Result<Step, TranscriptError>> {
        let (line_number, raw) = self.remaining.pop_front()?;
        let text = strip_terminator(&raw).to_string();
        let mut echo = vec![raw];

        let (command_line, input) = if let Some(caps) = heredoc().captures(&text) {
            let input = self.slurp(&caps[1], &mut echo);
            (caps[2].to_string(), Some(input))
        } else if let Some(rest) = text.strip_prefix(DIRECTIVE_MARKER) {
            (rest.to_string(), None)
        } else {
            return Some(Ok(Step {
                line_number,
                echo,
                directive: Directive::Text,
                expected: Vec::new(),
            }));
        };

        let expected = self.collect_block();
        let directive = if command_line.split_whitespace().next() == Some(self.cli_name.as_str()) {
            match CliCommand::parse(&command_line, input) {
                Ok(cmd) => Directive::Command(cmd),
                Err(e) => return Some(Err(e.at_line(line_number).with_command(command_line))),
            }
        } else {
            Directive::Shell(ShellCommand::new(command_line, input))
        };

        Some(Ok(Step {
            line_number,
            echo,
            directive,
            expected,
        }))
    }

    /// Consume heredoc input up to the terminator line, echoing every
    /// consumed line.
    fn slurp(&mut self, word: &str, echo: &mut Vec<String>) -> String {
        let mut input = String::new();
        while let Some((_, line)) = self.remaining.pop_front() {
            let done = strip_terminator(&line) == word;
            if !done {
                input.push_str(&line);
            }
            echo.push(line);
            if done {
                return input;
            }
        }
        tracing::warn!(terminator = word, "heredoc not terminated before end of transcript");
        input
    }

    /// Collect the expected block up to the next directive. Trailing
    /// ignorable lines are pushed back onto the cursor.
    fn collect_block(&mut self) -> Vec<String> {
        let mut block: Vec<(usize, String)> = Vec::new();
        while let Some((_, line)) = self.remaining.front() {
            if line.starts_with(DIRECTIVE_MARKER) {
                break;
            }
            if let Some(entry) = self.remaining.pop_front() {
                block.push(entry);
            }
        }
        while block.last().map_or(false, |(_, line)| is_ignorable(line)) {
            if let Some(entry) = block.pop() {
                self.remaining.push_front(entry);
            }
        }
        block.into_iter().map(|(_, line)| line).collect()
    }
}

impl Iterator for Transcript {
    type Item = Result<Step, TranscriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_step()
    }
}

/// Returns true if the transcript creates its own export targets, in which
/// case automatic export verification must stay out of its way.
pub fn manages_exports(text: &str) -> bool {
    text.contains("create zone-group") || text.contains("create output")
}

/// Returns true if the transcript queries a resolver, which needs the export
/// listener running.
pub fn queries_resolver(text: &str) -> bool {
    text.lines()
        .filter_map(|l| l.strip_prefix(DIRECTIVE_MARKER))
        .any(|l| ShellCommand::new(l, None).is_resolver_query())
}

pub(crate) fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn heredoc() -> &'static Regex {
    static HEREDOC: OnceLock<Regex> = OnceLock::new();
    HEREDOC.get_or_init(|| {
        Regex::new(r#"^\$ cat <<\s*['"]?(\w+)['"]?\s*\|\s*(.*\S)\s*$"#).expect("static regex")
    })
}
