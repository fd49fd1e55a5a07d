//! emx-transcript CLI
//!
//! Replay golden transcripts against a live CLI.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use emx_transcript::{RunConfig, TestResult, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "emx-transcript")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Replay recorded CLI transcripts and compare live output")]
struct Cli {
    /// Transcripts to run (names inside --dir); all when omitted
    tests: Vec<String>,

    /// Directory containing transcripts
    #[arg(long, default_value = "t", env = "TRANSCRIPT_DIR")]
    dir: PathBuf,

    /// Directory receiving the rewritten transcripts
    #[arg(long = "out", default_value = "out")]
    out_dir: PathBuf,

    /// Name of the CLI in transcript directives
    #[arg(long = "cli", default_value = "ndcli")]
    cli_name: String,

    /// Executable run for CLI directives [default: the CLI name in PATH]
    #[arg(long, env = "TRANSCRIPT_PROGRAM")]
    program: Option<PathBuf>,

    /// Shell command run in the work directory before each transcript
    #[arg(long)]
    setup: Vec<String>,

    /// Stop at the first failure
    #[arg(short = 'x', long)]
    fail_fast: bool,

    /// Verify the export after every zone-mutating command
    #[arg(short = 'p', long = "verify-export")]
    verify_exports: bool,

    /// Shell command checking the export ($EMX_COMMAND holds the directive)
    #[arg(long)]
    verify_cmd: Option<String>,

    /// Shell command printing the number of pending export updates
    #[arg(long)]
    backlog_cmd: Option<String>,

    /// Export listener started for transcripts that need it
    #[arg(long)]
    listener_cmd: Option<String>,

    /// Seconds to wait for pending export updates
    #[arg(long, default_value_t = 60)]
    poll_timeout: u64,

    /// Extra annotation rules (TOML)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Show a diff for failing transcripts
    #[arg(short, long)]
    diff: bool,

    /// Verbose output: show the replay log
    #[arg(short, long)]
    verbose: bool,

    /// Keep working directories after test (for debugging)
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// Root directory for working directories
    #[arg(long = "workdir")]
    workdir: Option<PathBuf>,

    /// Show number of transcripts without running
    #[arg(long = "count")]
    count: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "emx_transcript=debug" } else { "emx_transcript=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let verbose = cli.verbose;
    let show_diff = cli.diff;
    let config = RunConfig {
        dir: cli.dir,
        out_dir: cli.out_dir,
        tests: cli.tests,
        fail_fast: cli.fail_fast,
        verify_exports: cli.verify_exports,
        show_diff,
        cli_name: cli.cli_name,
        program: cli.program,
        setup: cli.setup,
        verify_cmd: cli.verify_cmd,
        backlog_cmd: cli.backlog_cmd,
        listener_cmd: cli.listener_cmd,
        poll_timeout: Duration::from_secs(cli.poll_timeout),
        rules_file: cli.rules,
        workdir_root: cli.workdir,
        preserve_work: cli.keep,
    };

    let runner = TestRunner::new(config).context("loading annotation rules")?;

    if cli.count {
        let count = runner.count_tests().context("discovering transcripts")?;
        println!("Found {} transcript(s)", count);
        return Ok(true);
    }

    let result = runner.run_all().context("running transcripts")?;
    report(&result, verbose, show_diff);
    Ok(result.all_passed())
}

fn report(result: &TestResult, verbose: bool, show_diff: bool) {
    for case in &result.cases {
        if case.passed {
            println!("{} ... ok ({}ms)", case.name, case.duration.as_millis());
            if verbose && !case.log.is_empty() {
                for line in case.log.lines() {
                    println!("      {}", line);
                }
            }
            continue;
        }

        println!("{} ... fail", case.name);
        if let Some(ref err) = case.error {
            for line in err.lines() {
                println!("      {}", line);
            }
        }
        for failure in &case.failures {
            println!("      line {}: {} ({:?})", failure.line, failure.command, failure.reason);
        }
        if verbose && !case.log.is_empty() {
            println!("      --- log ---");
            for line in case.log.lines() {
                println!("      {}", line);
            }
        }
        if show_diff {
            if let Some(ref diff) = case.diff {
                print!("{}", diff);
            }
        }
        println!("      output: {}", case.output.display());
        if let Some(ref wd) = case.workdir {
            println!("      workdir: {}", wd.display());
        }
    }

    println!();
    println!("{}", result.summary());
}
