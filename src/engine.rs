//! Transcript engine
//!
//! The Engine holds the rule table and replay options. It is stateless
//! config: one engine replays many transcripts, each with its own
//! [`Session`].

use std::time::Duration;
use crate::command::{CliCommand, ShellCommand};
use crate::error::TranscriptError;
use crate::matcher::{compare_lines, match_rows};
use crate::parser::{manages_exports, strip_terminator, Directive, Transcript};
use crate::rules::RuleSet;
use crate::session::Session;
use crate::sidechannel::{wait_until_drained, EXPORT_MISMATCH};
use crate::table::extract;

/// Why a directive failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Live output did not reconcile with the expected block
    Mismatch,
    /// The export side channel disagreed after a mutating command
    ExportDivergence,
}

/// A failed directive
#[derive(Debug, Clone)]
pub struct Failure {
    pub line: usize,
    pub command: String,
    pub reason: FailureReason,
}

/// Result of replaying one transcript
#[derive(Debug, Default)]
pub struct Replay {
    /// Failed directives, in transcript order
    pub failures: Vec<Failure>,
    /// Replay stopped at the first failure (fail-fast)
    pub stopped_early: bool,
}

impl Replay {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The transcript engine
pub struct Engine {
    /// Annotation rules for expected tables
    pub rules: RuleSet,
    /// First word of directives that go to the CLI under test
    pub cli_name: String,
    /// Stop at the first failing directive
    pub fail_fast: bool,
    /// Verify the export side channel after zone-mutating commands
    pub verify_exports: bool,
    /// Upper bound for waiting on downstream propagation
    pub poll_timeout: Duration,
}

impl Engine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            cli_name: "ndcli".into(),
            fail_fast: false,
            verify_exports: false,
            poll_timeout: Duration::from_secs(60),
        }
    }

    /// Replay a transcript, appending the rewritten transcript to `out`.
    ///
    /// Mismatches are recorded in `out` and in the returned [`Replay`].
    /// An error means the replay was abandoned; `out` then holds the
    /// transcript up to the failing directive.
    pub fn execute(
        &self,
        session: &mut Session,
        text: &str,
        filename: &str,
        out: &mut String,
    ) -> Result<Replay, TranscriptError> {
        let verify = self.verify_exports && session.verifier.is_some() && !manages_exports(text);
        if self.verify_exports && !verify {
            tracing::debug!(file = filename, "export verification off for this transcript");
        }

        let mut replay = Replay::default();
        let mut transcript = Transcript::new(text, self.cli_name.as_str());

        while let Some(step) = transcript.next_step() {
            let step = step.map_err(|e| e.in_file(filename))?;
            for line in &step.echo {
                out.push_str(line);
            }

            let (command, outcome) = match &step.directive {
                Directive::Text => continue,
                Directive::Command(cmd) => {
                    session.logf(&format!("> {}", cmd.line));
                    let outcome = self.run_cli(session, cmd, &step.expected, verify, out);
                    (cmd.line.as_str(), outcome)
                }
                Directive::Shell(cmd) => {
                    session.logf(&format!("> {}", cmd.line));
                    let outcome = self.run_shell(session, cmd, &step.expected, out);
                    (cmd.line.as_str(), outcome)
                }
            };

            let reason = outcome.map_err(|e| {
                tracing::error!(file = filename, line = step.line_number, command, error = %e, "directive abandoned");
                e.with_location(filename, step.line_number).with_command(command)
            })?;

            if let Some(reason) = reason {
                tracing::info!(file = filename, line = step.line_number, command, ?reason, "directive failed");
                session.logf(&format!("[{:?} at line {}]", reason, step.line_number));
                replay.failures.push(Failure {
                    line: step.line_number,
                    command: command.to_string(),
                    reason,
                });
                if self.fail_fast {
                    replay.stopped_early = !transcript.is_exhausted();
                    break;
                }
            }
        }

        Ok(replay)
    }

    fn run_cli(
        &self,
        session: &mut Session,
        cmd: &CliCommand,
        expected: &[String],
        verify: bool,
        out: &mut String,
    ) -> Result<Option<FailureReason>, TranscriptError> {
        tracing::debug!(command = %cmd.line, shape = ?cmd.shape, "running cli command");
        let output = session.cli.run(&cmd.args, cmd.input.as_deref())?;
        let text = match cmd.redirect {
            Some(ref target) => {
                std::fs::write(session.resolve_path(target), &output.stdout)?;
                output.stderr
            }
            None => output.combined(),
        };

        let actual_raw: Vec<String> = text.lines().map(str::to_string).collect();
        let expected_text: Vec<String> = expected.iter().map(|l| strip_terminator(l).to_string()).collect();
        let actual = extract(&actual_raw, cmd.shape);
        let mut wanted = extract(&expected_text, cmd.shape);
        self.rules.annotate(&mut wanted, cmd);

        let result = match_rows(&actual, &wanted, &actual_raw, expected);
        let mut reason = (result.lines != expected).then_some(FailureReason::Mismatch);
        for line in &result.lines {
            out.push_str(line);
        }

        if verify && cmd.mutates_zone() {
            if let Some(backlog) = session.backlog.as_deref_mut() {
                wait_until_drained(backlog, self.poll_timeout)?;
            }
            if let Some(verifier) = session.verifier.as_deref_mut() {
                if !verifier.verify(cmd)? {
                    out.push_str(EXPORT_MISMATCH);
                    out.push('\n');
                    reason = Some(FailureReason::ExportDivergence);
                }
            }
        }
        Ok(reason)
    }

    fn run_shell(
        &self,
        session: &mut Session,
        cmd: &ShellCommand,
        expected: &[String],
        out: &mut String,
    ) -> Result<Option<FailureReason>, TranscriptError> {
        let sorted = cmd.is_resolver_query();
        if sorted {
            if let Some(backlog) = session.backlog.as_deref_mut() {
                wait_until_drained(backlog, self.poll_timeout)?;
            }
        }
        tracing::debug!(command = %cmd.line, sorted, "running shell command");
        let actual = session.shell.run(&cmd.line, cmd.input.as_deref())?;
        let (lines, passed) = compare_lines(&actual, expected, sorted);
        for line in &lines {
            out.push_str(line);
        }
        Ok((!passed).then_some(FailureReason::Mismatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::exec::{CommandOutput, CommandRunner, ShellRunner};
    use crate::sidechannel::{Backlog, SideChannel};

    /// CLI stand-in answering from a fixed table of argument strings
    struct Canned(HashMap<String, String>);

    impl CommandRunner for Canned {
        fn run(&mut self, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, TranscriptError> {
            let key = args.join(" ");
            let stdout = match stdin {
                Some(input) if key == "echo-input" => input.to_string(),
                _ => self.0.get(&key).cloned().unwrap_or_default(),
            };
            Ok(CommandOutput { stdout, stderr: String::new() })
        }
    }

    /// Shell stand-in that prints its command line words, one per line
    struct Words;

    impl ShellRunner for Words {
        fn run(&mut self, line: &str, _stdin: Option<&str>) -> Result<Vec<String>, TranscriptError> {
            Ok(line.split_whitespace().skip(1).map(str::to_string).collect())
        }
    }

    /// CLI stand-in writing fixed text to both streams
    struct Split(&'static str, &'static str);

    impl CommandRunner for Split {
        fn run(&mut self, _args: &[String], _stdin: Option<&str>) -> Result<CommandOutput, TranscriptError> {
            Ok(CommandOutput { stdout: self.0.into(), stderr: self.1.into() })
        }
    }

    struct Broken;

    impl ShellRunner for Broken {
        fn run(&mut self, line: &str, _stdin: Option<&str>) -> Result<Vec<String>, TranscriptError> {
            Err(TranscriptError::command_failed(format!("cannot run {}", line)))
        }
    }

    struct Verdict(bool, usize);

    impl SideChannel for Verdict {
        fn verify(&mut self, _command: &CliCommand) -> Result<bool, TranscriptError> {
            self.1 += 1;
            Ok(self.0)
        }
    }

    struct Drained;

    impl Backlog for Drained {
        fn pending(&mut self) -> Result<u64, TranscriptError> {
            Ok(0)
        }

        fn wait_for_progress(&mut self, _timeout: Duration) -> Result<(), TranscriptError> {
            Ok(())
        }
    }

    fn session(responses: &[(&str, &str)]) -> Session {
        let canned = responses.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Session::new(std::env::temp_dir(), Box::new(Canned(canned)), Box::new(Words))
    }

    fn replay(engine: &Engine, session: &mut Session, text: &str) -> (Replay, String) {
        let mut out = String::new();
        let replay = engine.execute(session, text, "t/test", &mut out).unwrap();
        (replay, out)
    }

    fn engine() -> Engine {
        Engine::new(RuleSet::builtin().unwrap())
    }

    #[test]
    fn test_identical_output_is_idempotent() {
        let text = "# setup\n$ ndcli list zones\nname zone\na    b\n\n$ echo x y\nx\ny\n";
        let mut s = session(&[("list zones", "name zone\na    b\n")]);
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(r.passed());
        assert_eq!(out, text);
    }

    #[test]
    fn test_reordered_and_wildcarded_output_renders_as_recorded() {
        let text = "$ ndcli show zone a.de\ncreated:2020-01-01\nname:a.de\n";
        let mut s = session(&[("show zone a.de", "name:a.de\ncreated:2031-07-07\n")]);
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(r.passed());
        assert_eq!(out, text);
    }

    #[test]
    fn test_mismatch_writes_actual_output() {
        let text = "$ ndcli create zone a.de\nINFO - created\n$ echo ok\nok\n";
        let mut s = session(&[("create zone a.de", "ERROR - denied\n")]);
        let (r, out) = replay(&engine(), &mut s, text);
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].line, 1);
        assert_eq!(r.failures[0].reason, FailureReason::Mismatch);
        assert!(!r.stopped_early);
        assert_eq!(out, "$ ndcli create zone a.de\nERROR - denied\n$ echo ok\nok\n");
    }

    #[test]
    fn test_fail_fast_stops_between_directives() {
        let text = "$ echo a\nb\n$ echo c\nc\n";
        let mut e = engine();
        e.fail_fast = true;
        let mut s = session(&[]);
        let (r, out) = replay(&e, &mut s, text);
        assert!(r.stopped_early);
        assert_eq!(out, "$ echo a\na\n");
    }

    #[test]
    fn test_blank_line_is_echoed_before_next_directive() {
        let text = "$ echo a\na\n\n$ echo b\nb\n";
        let mut s = session(&[]);
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(r.passed());
        assert_eq!(out, text);

        // wrong output: the blank line still sits between the blocks
        let text = "$ echo z\na\n\n$ echo b\nb\n";
        let (_, out) = replay(&engine(), &mut session(&[]), text);
        assert_eq!(out, "$ echo z\nz\n\n$ echo b\nb\n");
    }

    #[test]
    fn test_heredoc_input_reaches_cli() {
        let text = "$ cat <<EOF | ndcli echo-input\nhello\nEOF\nhello\n";
        let mut s = session(&[]);
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(r.passed());
        assert_eq!(out, text);
    }

    #[test]
    fn test_resolver_queries_compare_sorted() {
        let text = "$ dig b a\na\nb\n";
        let mut s = session(&[]).with_backlog(Box::new(Drained));
        let (r, _) = replay(&engine(), &mut s, text);
        assert!(r.passed());

        let text = "$ echo b a\na\nb\n";
        let (r, _) = replay(&engine(), &mut session(&[]), text);
        assert!(!r.passed());
    }

    #[test]
    fn test_export_divergence_is_recorded() {
        let text = "$ ndcli create zone a.de\n$ ndcli list zones\n";
        let mut e = engine();
        e.verify_exports = true;
        let mut s = session(&[]).with_verifier(Box::new(Verdict(false, 0)));
        let (r, out) = replay(&e, &mut s, text);
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].reason, FailureReason::ExportDivergence);
        assert_eq!(out, format!("$ ndcli create zone a.de\n{}\n$ ndcli list zones\n", EXPORT_MISMATCH));
    }

    #[test]
    fn test_export_verification_skipped_when_transcript_manages_outputs() {
        let text = "$ ndcli create output o plugin pdns-db\n$ ndcli create zone a.de\n";
        let mut e = engine();
        e.verify_exports = true;
        let mut s = session(&[]).with_verifier(Box::new(Verdict(false, 0)));
        let (r, _) = replay(&e, &mut s, text);
        assert!(r.passed());
    }

    #[test]
    fn test_redirected_stdout_lands_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let text = "$ ndcli dump zone a.de > z.txt\nWARNING - w\n";
        let mut s = Session::new(dir.path(), Box::new(Split("zone data\n", "WARNING - w\n")), Box::new(Words));
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(r.passed());
        assert_eq!(out, text);
        assert_eq!(std::fs::read_to_string(dir.path().join("z.txt")).unwrap(), "zone data\n");

        // stdout is not part of the compared output
        let text = "$ ndcli dump zone a.de > z.txt\nzone data\nWARNING - w\n";
        let mut s = Session::new(dir.path(), Box::new(Split("zone data\n", "WARNING - w\n")), Box::new(Words));
        let (r, out) = replay(&engine(), &mut s, text);
        assert!(!r.passed());
        assert_eq!(out, "$ ndcli dump zone a.de > z.txt\nWARNING - w\n");
    }

    #[test]
    fn test_tool_failure_abandons_transcript() {
        let text = "$ echo a\na\n$ echo b\nb\n";
        let mut s = Session::new(std::env::temp_dir(), Box::new(Canned(HashMap::new())), Box::new(Broken));
        let mut out = String::new();
        let err = engine().execute(&mut s, text, "t/broken", &mut out).unwrap_err();
        assert_eq!(err.line, Some(1));
        assert_eq!(err.command.as_deref(), Some("echo a"));
        assert_eq!(out, "$ echo a\n");
    }
}
