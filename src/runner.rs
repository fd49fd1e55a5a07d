//! Test runner
//!
//! Orchestrates replaying transcript files: discovers transcripts in a
//! directory, creates work directories, wires up the collaborators,
//! replays, writes the rewritten transcripts, and reports results.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use similar::TextDiff;
use crate::engine::{Engine, Failure};
use crate::error::TranscriptError;
use crate::exec::{ProcessRunner, ShellProcess};
use crate::parser::queries_resolver;
use crate::rules::RuleSet;
use crate::session::{transcript_env, Session};
use crate::sidechannel::{Listener, ShellBacklog, ShellVerifier};

/// Configuration for the test runner
pub struct RunConfig {
    /// Directory containing transcripts
    pub dir: PathBuf,
    /// Directory receiving the rewritten transcripts
    pub out_dir: PathBuf,
    /// Transcript names to run; empty runs every file in `dir`
    pub tests: Vec<String>,
    /// Stop at the first failing directive and the first failing test
    pub fail_fast: bool,
    /// Verify the export side channel after zone-mutating commands
    pub verify_exports: bool,
    /// Produce a unified diff for failing tests
    pub show_diff: bool,
    /// First word of directives handled by the CLI under test
    pub cli_name: String,
    /// Executable for the CLI; defaults to `cli_name` looked up in PATH
    pub program: Option<PathBuf>,
    /// Shell commands run in the work directory before each transcript
    pub setup: Vec<String>,
    /// Shell command checking the export after a mutating command
    pub verify_cmd: Option<String>,
    /// Shell command printing the number of pending export updates
    pub backlog_cmd: Option<String>,
    /// Long-running export listener whose output signals progress
    pub listener_cmd: Option<String>,
    /// Upper bound for waiting on pending export updates
    pub poll_timeout: Duration,
    /// Extra annotation rules (TOML)
    pub rules_file: Option<PathBuf>,
    /// Root directory for temp work directories
    pub workdir_root: Option<PathBuf>,
    /// Preserve work directories after the test (for debugging)
    pub preserve_work: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("t"),
            out_dir: PathBuf::from("out"),
            tests: Vec::new(),
            fail_fast: false,
            verify_exports: false,
            show_diff: false,
            cli_name: "ndcli".into(),
            program: None,
            setup: Vec::new(),
            verify_cmd: None,
            backlog_cmd: None,
            listener_cmd: None,
            poll_timeout: Duration::from_secs(60),
            rules_file: None,
            workdir_root: None,
            preserve_work: false,
        }
    }
}

/// Result of running all tests
#[derive(Debug)]
pub struct TestResult {
    /// Individual test case results
    pub cases: Vec<TestCaseResult>,
    /// Total duration
    pub duration: Duration,
}

impl TestResult {
    /// Check if all tests passed
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|c| c.passed)
    }

    /// Count passed tests
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    /// Count failed tests
    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed).count()
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed ({}ms)",
            self.passed_count(),
            self.failed_count(),
            self.duration.as_millis(),
        )
    }
}

/// Result of a single test case
#[derive(Debug)]
pub struct TestCaseResult {
    /// Test name (the transcript's file name)
    pub name: String,
    /// Transcript path
    pub file: PathBuf,
    /// Rewritten transcript path
    pub output: PathBuf,
    /// Whether the rewritten transcript is identical to the input
    pub passed: bool,
    /// Error message if the replay was abandoned
    pub error: Option<String>,
    /// Failed directives
    pub failures: Vec<Failure>,
    /// Execution log
    pub log: String,
    /// Unified diff of transcript vs. output (failures, when requested)
    pub diff: Option<String>,
    /// Duration
    pub duration: Duration,
    /// Working directory (if preserved)
    pub workdir: Option<PathBuf>,
}

/// The test runner
pub struct TestRunner {
    engine: Engine,
    config: RunConfig,
}

impl TestRunner {
    /// Create a runner with the built-in rules plus `config.rules_file`
    pub fn new(config: RunConfig) -> Result<Self, TranscriptError> {
        let mut rules = RuleSet::builtin()?;
        if let Some(ref path) = config.rules_file {
            rules.extend(RuleSet::load(path)?);
        }
        Ok(Self::with_rules(rules, config))
    }

    /// Create a runner with an explicit rule table
    pub fn with_rules(rules: RuleSet, config: RunConfig) -> Self {
        let mut engine = Engine::new(rules);
        engine.cli_name = config.cli_name.clone();
        engine.fail_fast = config.fail_fast;
        engine.verify_exports = config.verify_exports;
        engine.poll_timeout = config.poll_timeout;
        if config.verify_exports && config.verify_cmd.is_none() {
            tracing::warn!("export verification requested but no verify command configured");
        }
        Self { engine, config }
    }

    /// Discover transcripts: the named tests, or every file in the directory
    pub fn discover(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let dir = &self.config.dir;
        if !self.config.tests.is_empty() {
            return Ok(self.config.tests.iter().map(|t| dir.join(t)).collect());
        }

        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("transcript directory not found: {}", dir.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Run all discovered transcripts
    pub fn run_all(&self) -> Result<TestResult, std::io::Error> {
        let start = Instant::now();
        let files = self.discover()?;
        std::fs::create_dir_all(&self.config.out_dir)?;

        let mut cases = Vec::new();
        for file in &files {
            let result = self.run_one(file);
            let failed = !result.passed;
            cases.push(result);
            if failed && self.config.fail_fast {
                break;
            }
        }

        Ok(TestResult {
            cases,
            duration: start.elapsed(),
        })
    }

    /// Count the number of transcripts that would be run
    pub fn count_tests(&self) -> Result<usize, std::io::Error> {
        Ok(self.discover()?.len())
    }

    /// Replay a single transcript
    pub fn run_one(&self, file: &Path) -> TestCaseResult {
        let start = Instant::now();
        let name = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let output = self.config.out_dir.join(&name);
        let mut case = TestCaseResult {
            name,
            file: file.to_path_buf(),
            output,
            passed: false,
            error: None,
            failures: Vec::new(),
            log: String::new(),
            diff: None,
            duration: Duration::ZERO,
            workdir: None,
        };

        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                case.error = Some(format!("failed to read transcript: {}", e));
                case.duration = start.elapsed();
                return case;
            }
        };
        let tmpdir = match self.create_workdir(&case.name) {
            Ok(dir) => dir,
            Err(e) => {
                case.error = Some(format!("failed to create workdir: {}", e));
                case.duration = start.elapsed();
                return case;
            }
        };

        let mut out = String::new();
        let filename = file.to_string_lossy().to_string();
        match self.replay(tmpdir.path(), &text, &filename, &mut out) {
            Ok((replay, log)) => {
                case.failures = replay.failures;
                case.log = log;
            }
            Err(e) => {
                tracing::error!(test = %case.name, error = %e, "transcript abandoned");
                case.error = Some(e.to_string());
            }
        }

        if let Err(e) = std::fs::write(&case.output, &out) {
            let msg = format!("failed to write {}: {}", case.output.display(), e);
            case.error.get_or_insert(msg);
        }
        case.passed = case.error.is_none() && out == text;

        if !case.passed && self.config.show_diff {
            let diff = TextDiff::from_lines(&out, &text)
                .unified_diff()
                .header(&case.output.to_string_lossy(), &filename)
                .to_string();
            case.diff = Some(diff);
        }

        // Preserve workdir on failure or if configured
        if self.config.preserve_work || !case.passed {
            case.workdir = Some(tmpdir.keep());
        }
        case.duration = start.elapsed();
        case
    }

    /// Build the session for one transcript, run setup, and replay.
    fn replay(
        &self,
        workdir: &Path,
        text: &str,
        filename: &str,
        out: &mut String,
    ) -> Result<(crate::engine::Replay, String), TranscriptError> {
        let env = transcript_env(workdir);
        let shell = ShellProcess::new(workdir, env.clone());
        for command in &self.config.setup {
            tracing::debug!(command = %command, "setup");
            shell.run_checked(command)?;
        }

        let program = match self.config.program {
            Some(ref p) => p.to_string_lossy().to_string(),
            None => self.config.cli_name.clone(),
        };
        let cli = ProcessRunner::new(program, workdir, env.clone());
        let mut session = Session::new(workdir, Box::new(cli), Box::new(shell));

        if let Some(ref cmd) = self.config.verify_cmd {
            if self.config.verify_exports {
                session = session.with_verifier(Box::new(ShellVerifier::new(cmd.as_str(), workdir, env.clone())));
            }
        }
        if let Some(ref query) = self.config.backlog_cmd {
            let mut backlog = ShellBacklog::new(query.as_str(), workdir, env.clone());
            if let Some(ref listener) = self.config.listener_cmd {
                if self.config.verify_exports || queries_resolver(text) {
                    backlog = backlog.with_listener(Listener::spawn(listener, workdir, &env)?);
                }
            }
            session = session.with_backlog(Box::new(backlog));
        }

        let replay = self.engine.execute(&mut session, text, filename, out)?;
        Ok((replay, session.log))
    }

    fn create_workdir(&self, name: &str) -> Result<tempfile::TempDir, std::io::Error> {
        let prefix = format!("transcript-{}-", name);
        if let Some(ref root) = self.config.workdir_root {
            std::fs::create_dir_all(root)?;
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        } else {
            tempfile::Builder::new().prefix(&prefix).tempdir()
        }
    }
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
}

impl TestRunnerBuilder {
    /// Start building a runner for the given transcript directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig {
                dir: dir.into(),
                ..Default::default()
            },
        }
    }

    /// Set the output directory
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    /// Only run the named transcripts
    pub fn tests(mut self, tests: Vec<String>) -> Self {
        self.config.tests = tests;
        self
    }

    /// Stop at the first failure
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Produce diffs for failing tests
    pub fn show_diff(mut self, show_diff: bool) -> Self {
        self.config.show_diff = show_diff;
        self
    }

    /// Name of the CLI in transcripts
    pub fn cli_name(mut self, name: impl Into<String>) -> Self {
        self.config.cli_name = name.into();
        self
    }

    /// Executable to run for the CLI
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.program = Some(program.into());
        self
    }

    /// Add a setup command
    pub fn setup(mut self, command: impl Into<String>) -> Self {
        self.config.setup.push(command.into());
        self
    }

    /// Enable export verification with the given command
    pub fn verify_exports(mut self, command: impl Into<String>) -> Self {
        self.config.verify_exports = true;
        self.config.verify_cmd = Some(command.into());
        self
    }

    /// Set the working directory root
    pub fn workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workdir_root = Some(root.into());
        self
    }

    /// Build the runner
    pub fn build(self) -> Result<TestRunner, TranscriptError> {
        TestRunner::new(self.config)
    }
}

/// Convenience function: create a runner builder for a directory
pub fn run(dir: impl Into<PathBuf>) -> TestRunnerBuilder {
    TestRunnerBuilder::new(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let case = |passed| TestCaseResult {
            name: "x".into(),
            file: PathBuf::from("t/x"),
            output: PathBuf::from("out/x"),
            passed,
            error: None,
            failures: Vec::new(),
            log: String::new(),
            diff: None,
            duration: Duration::ZERO,
            workdir: None,
        };
        let result = TestResult {
            cases: vec![case(true), case(false), case(true)],
            duration: Duration::from_millis(7),
        };
        assert!(!result.all_passed());
        assert_eq!(result.summary(), "2 passed, 1 failed (7ms)");
    }

    #[test]
    fn test_discover_sorts_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b-zone", "a-pool", ".swp"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let runner = run(dir.path()).build().unwrap();
        let names: Vec<_> = runner
            .discover()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a-pool", "b-zone"]);
    }

    #[test]
    fn test_named_tests_are_not_scanned() {
        let runner = run("nowhere").tests(vec!["x".into()]).build().unwrap();
        assert_eq!(runner.discover().unwrap(), vec![PathBuf::from("nowhere/x")]);
        assert_eq!(runner.count_tests().unwrap(), 1);
    }

    #[test]
    fn test_missing_directory() {
        let runner = run("/definitely/not/here").build().unwrap();
        assert!(runner.discover().is_err());
    }
}
