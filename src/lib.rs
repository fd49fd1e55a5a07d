//! emx-transcript: golden-transcript testing for CLI tools
//!
//! Replays recorded CLI sessions against a live system and checks that the
//! live output still matches the recording.
//!
//! # Overview
//!
//! A transcript mixes commands and their expected output. Each command is
//! re-run; its output is compared with the recorded block; and a rewritten
//! transcript is produced in which accepted output is replaced by the
//! recorded text. A transcript passes when the rewrite is identical to the
//! recording, so failures are read as a plain diff.
//!
//! # Transcript Syntax
//!
//! ```text
//! # comment
//! $ ndcli create zone a.de
//! $ ndcli list zones
//! name views
//! a.de 1
//! $ ndcli show zone a.de
//! created:2020-01-01 10:00:00
//! name:a.de
//! $ cat <<EOF | ndcli import zone a.de
//! www 3600 IN A 10.0.0.1
//! EOF
//! $ dig @127.1.1.1 a.de SOA +short
//! ^ns\. .* re
//! ```
//!
//! # Comparison
//!
//! | Output | Compared as |
//! |--------|-------------|
//! | `show`, `modify rr`, `get/mark ip` ... | `key: value` rows, any order |
//! | `list ... -H`, `dump zone` | tab-separated rows, any order |
//! | `list`, `history` | fixed-width columns under a header, any order |
//! | other CLI commands | lines, any order |
//! | shell commands | lines in order; ` re` suffix makes a line a regex |
//! | resolver queries (`dig`, `drill`) | lines, sorted |
//!
//! Generated values (timestamps, key names, serials, digests) are
//! tolerated through annotation rules, see [`RuleSet`].

mod command;
mod engine;
mod error;
mod exec;
mod matcher;
mod parser;
mod rules;
mod runner;
mod session;
mod sidechannel;
mod table;

pub use command::{split_words, CliCommand, Layout, Shape, ShellCommand};
pub use engine::{Engine, Failure, FailureReason, Replay};
pub use error::{ErrorKind, TranscriptError};
pub use exec::{CommandOutput, CommandRunner, ProcessRunner, ShellProcess, ShellRunner};
pub use matcher::{compare_lines, match_rows, MatchResult, REGEX_SUFFIX};
pub use parser::{Directive, Step, Transcript, DIRECTIVE_MARKER};
pub use rules::{Condition, Rewrite, RuleSet, RuleSpec, Scope};
pub use runner::{run, RunConfig, TestCaseResult, TestResult, TestRunner, TestRunnerBuilder};
pub use session::{transcript_env, Session};
pub use sidechannel::{wait_until_drained, Backlog, Listener, ShellBacklog, ShellVerifier, SideChannel, EXPORT_MISMATCH};
pub use table::{extract, is_ignorable, Cell, Pattern, Row, Table};
