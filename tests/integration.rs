//! Integration test: replay transcripts against a stand-in CLI
//!
//! A small shell script plays the CLI under test. Transcripts are written
//! to a temp directory and replayed through the public runner API.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const FAKE_CLI: &str = r#"#!/bin/sh
case "$*" in
  "create zone a.de") echo "INFO - Creating zone a.de" ;;
  "list zones") printf 'name     views\nb.de     1\na.de     1\n' ;;
  "list zones -H") printf 'name\tviews\nb.de\t1\na.de\t1\n' ;;
  "show zone a.de") printf 'created:2026-10-16 10:00:00\nname:a.de\nviews:1\n' ;;
  "import zone a.de") cat ;;
  "dump zone a.de") cat zone.out 2>/dev/null ;;
  "dump zone b.de") printf 'b.de.\t86400\tIN\tA\t10.0.0.2\n'; echo "WARNING - b.de is unsigned" >&2 ;;
  *) echo "ERROR - unknown command: $*" >&2; exit 1 ;;
esac
"#;

struct Fixture {
    _root: tempfile::TempDir,
    program: PathBuf,
    dir: PathBuf,
    out: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let program = root.path().join("ndcli");
        std::fs::write(&program, FAKE_CLI).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        let dir = root.path().join("t");
        std::fs::create_dir(&dir).unwrap();
        let out = root.path().join("out");
        Self {
            program,
            dir,
            out,
            _root: root,
        }
    }

    fn transcript(&self, name: &str, text: &str) {
        std::fs::write(self.dir.join(name), text).unwrap();
    }

    fn runner(&self) -> emx_transcript::TestRunnerBuilder {
        emx_transcript::run(&self.dir)
            .out_dir(&self.out)
            .program(&self.program)
            .cli_name("ndcli")
    }

    fn output(&self, name: &str) -> String {
        std::fs::read_to_string(self.out.join(name)).unwrap()
    }
}

const PASSING: &str = "\
# zones are listed in any order
$ ndcli create zone a.de
INFO - Creating zone a.de
$ ndcli list zones
name     views
a.de     1
b.de     1

$ ndcli list zones -H
name\tviews
a.de\t1
b.de\t1
$ ndcli show zone a.de
created:2020-01-01 09:00:00
name:a.de
views:1
$ echo hello
hello
$ printf 'ns1.a.de.\\n'
^ns\\d\\. re
";

#[test]
fn passing_transcript_is_reproduced() {
    let fx = Fixture::new();
    fx.transcript("zones", PASSING);

    let result = fx.runner().build().unwrap().run_all().unwrap();
    assert_eq!(result.cases.len(), 1);
    let case = &result.cases[0];
    assert!(case.passed, "error: {:?} failures: {:?}", case.error, case.failures);
    assert!(case.failures.is_empty());
    assert!(case.workdir.is_none());
    assert_eq!(fx.output("zones"), PASSING);
    assert!(result.all_passed());
}

#[test]
fn heredoc_input_and_shell_redirect() {
    let fx = Fixture::new();
    let text = "\
$ cat <<EOF | ndcli import zone a.de
a.de. 86400 IN A 10.0.0.1
EOF
a.de. 86400 IN A 10.0.0.1
$ echo 'a.de.\t86400\tIN\tA\t10.0.0.1' > zone.out
$ ndcli dump zone a.de
a.de.\t86400\tIN\tA\t10.0.0.1
";
    fx.transcript("import", text);

    let result = fx.runner().build().unwrap().run_all().unwrap();
    let case = &result.cases[0];
    assert!(case.passed, "error: {:?} failures: {:?}", case.error, case.failures);
    assert_eq!(fx.output("import"), text);
}

#[test]
fn cli_redirect_keeps_only_stderr_in_transcript() {
    let fx = Fixture::new();
    let text = "\
$ ndcli dump zone b.de > b.zone
WARNING - b.de is unsigned
$ cat b.zone
b.de.\t86400\tIN\tA\t10.0.0.2
";
    fx.transcript("redirect", text);

    let result = fx.runner().build().unwrap().run_all().unwrap();
    let case = &result.cases[0];
    assert!(case.passed, "error: {:?} failures: {:?}", case.error, case.failures);
    assert_eq!(fx.output("redirect"), text);
}

#[test]
fn mismatch_is_recorded_in_output() {
    let fx = Fixture::new();
    let text = "\
$ ndcli list zones
name     views
a.de     1
c.de     1
$ echo done
done
";
    fx.transcript("drift", text);

    let result = fx.runner().show_diff(true).build().unwrap().run_all().unwrap();
    let case = &result.cases[0];
    assert!(!case.passed);
    assert!(case.error.is_none());
    assert_eq!(case.failures.len(), 1);
    assert_eq!(case.failures[0].line, 1);
    assert_eq!(case.failures[0].command, "ndcli list zones");

    // matched rows keep the recorded text, the live row shows up as is
    let out = fx.output("drift");
    assert!(out.contains("a.de     1\n"));
    assert!(out.contains("b.de     1\n"));
    assert!(!out.contains("c.de"));
    // replay continued past the failure
    assert!(out.ends_with("$ echo done\ndone\n"));

    let diff = case.diff.as_deref().unwrap();
    assert!(diff.contains("+c.de     1"));
    assert!(diff.contains("-b.de     1"));
    assert!(case.workdir.is_some());
    assert_eq!(result.summary().split(' ').take(4).collect::<Vec<_>>(), vec!["0", "passed,", "1", "failed"]);
}

#[test]
fn fail_fast_stops_at_first_failure() {
    let fx = Fixture::new();
    fx.transcript("a-broken", "$ ndcli frobnicate\n$ echo never\nnever\n");
    fx.transcript("b-fine", "$ echo fine\nfine\n");

    let result = fx.runner().fail_fast(true).build().unwrap().run_all().unwrap();
    assert_eq!(result.cases.len(), 1);
    assert!(!result.cases[0].passed);

    let out = fx.output("a-broken");
    assert_eq!(out, "$ ndcli frobnicate\nERROR - unknown command: frobnicate\n");
    assert!(!fx.out.join("b-fine").exists());
}

#[test]
fn without_fail_fast_every_transcript_runs() {
    let fx = Fixture::new();
    fx.transcript("a-broken", "$ ndcli frobnicate\n");
    fx.transcript("b-fine", "$ echo fine\nfine\n");

    let result = fx.runner().build().unwrap().run_all().unwrap();
    assert_eq!(result.passed_count(), 1);
    assert_eq!(result.failed_count(), 1);
    assert_eq!(fx.output("b-fine"), "$ echo fine\nfine\n");
}

#[test]
fn named_tests_only() {
    let fx = Fixture::new();
    fx.transcript("a", "$ echo a\na\n");
    fx.transcript("b", "$ echo b\nb\n");

    let result = fx.runner().tests(vec!["b".into()]).build().unwrap().run_all().unwrap();
    assert_eq!(result.cases.len(), 1);
    assert_eq!(result.cases[0].name, "b");
}

#[test]
fn failing_setup_abandons_transcript() {
    let fx = Fixture::new();
    fx.transcript("x", "$ echo x\nx\n");

    let result = fx.runner().setup("exit 3").build().unwrap().run_all().unwrap();
    let case = &result.cases[0];
    assert!(!case.passed);
    assert!(case.error.as_deref().unwrap().contains("exit 3"));
    assert_eq!(fx.output("x"), "");
}

#[test]
fn export_check_reports_divergence() {
    let fx = Fixture::new();
    let text = "$ ndcli create zone a.de\nINFO - Creating zone a.de\n";
    fx.transcript("export", text);

    let result = fx.runner().verify_exports("test \"$EMX_COMMAND\" != 'ndcli create zone a.de'").build().unwrap().run_all().unwrap();
    let case = &result.cases[0];
    assert!(!case.passed);
    assert_eq!(case.failures[0].reason, emx_transcript::FailureReason::ExportDivergence);
    assert_eq!(fx.output("export"), format!("{}Zone incorrectly exported\n", text));
}

#[test]
fn workdir_root_is_used() {
    let fx = Fixture::new();
    let root = fx.dir.parent().map(|p| p.join("work")).unwrap();
    fx.transcript("pwd", "$ pwd\n.* re\n");

    let result = fx.runner().workdir_root(&root).build().unwrap().run_all().unwrap();
    assert!(result.cases[0].passed);
    assert!(Path::new(&root).is_dir());
}
