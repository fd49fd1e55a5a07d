//! Process collaborators: the CLI under test and the system shell

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use crate::error::TranscriptError;

/// Captured output of one CLI invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, the way the transcript records them
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

/// Runs the CLI under test.
///
/// A non-zero exit status is not an error: error messages are part of the
/// recorded output. Only failing to run the program at all is.
pub trait CommandRunner {
    fn run(&mut self, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, TranscriptError>;
}

/// Runs a raw command line through the shell, returning stdout lines
/// followed by stderr lines.
pub trait ShellRunner {
    fn run(&mut self, line: &str, stdin: Option<&str>) -> Result<Vec<String>, TranscriptError>;
}

/// [`CommandRunner`] that spawns the CLI as a subprocess
pub struct ProcessRunner {
    program: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>, env: Vec<(String, String)>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
            env,
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, TranscriptError> {
        let path_env = lookup(&self.env, "PATH").unwrap_or("");
        let resolved = look_path(path_env, &self.program).map_err(|e| {
            TranscriptError::command_failed(format!("failed to execute '{}': {}", self.program, e))
        })?;

        let mut cmd = ProcessCommand::new(&resolved);
        cmd.args(args);
        let (stdout, stderr, _) = spawn_and_wait(cmd, &self.workdir, &self.env, stdin)
            .map_err(|e| TranscriptError::command_failed(format!("failed to execute '{}': {}", self.program, e)))?;
        Ok(CommandOutput { stdout, stderr })
    }
}

/// [`ShellRunner`] backed by `sh -c`
pub struct ShellProcess {
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl ShellProcess {
    pub fn new(workdir: impl Into<PathBuf>, env: Vec<(String, String)>) -> Self {
        Self {
            workdir: workdir.into(),
            env,
        }
    }

    /// Run a setup command; a non-zero exit status is an error.
    pub fn run_checked(&self, line: &str) -> Result<(), TranscriptError> {
        let (stdout, stderr, success) = spawn_and_wait(shell(line), &self.workdir, &self.env, None)
            .map_err(|e| TranscriptError::command_failed(format!("failed to run '{}': {}", line, e)))?;
        if !success {
            return Err(TranscriptError::command_failed(format!(
                "'{}' failed\n{}{}",
                line, stdout, stderr
            )));
        }
        Ok(())
    }
}

impl ShellRunner for ShellProcess {
    fn run(&mut self, line: &str, stdin: Option<&str>) -> Result<Vec<String>, TranscriptError> {
        let (stdout, stderr, _) = spawn_and_wait(shell(line), &self.workdir, &self.env, stdin)
            .map_err(|e| TranscriptError::command_failed(format!("failed to run '{}': {}", line, e)))?;
        Ok(stdout.lines().chain(stderr.lines()).map(str::to_string).collect())
    }
}

pub(crate) fn shell(line: &str) -> ProcessCommand {
    let mut cmd = ProcessCommand::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

/// Spawn `cmd` in `workdir` with exactly `env`, feed `stdin`, and collect
/// (stdout, stderr, success).
pub(crate) fn spawn_and_wait(
    mut cmd: ProcessCommand,
    workdir: &Path,
    env: &[(String, String)],
    stdin: Option<&str>,
) -> std::io::Result<(String, String, bool)> {
    cmd.current_dir(workdir);
    cmd.env_clear();
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    // write stdin from a thread so a chatty child cannot block us on a full pipe
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(std::thread::spawn(move || pipe.write_all(input.as_bytes())))
        }
        _ => None,
    };
    let output = child.wait_with_output()?;
    if let Some(handle) = writer {
        if let Ok(Err(e)) = handle.join() {
            // the child may exit without reading its input
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e);
            }
        }
    }
    Ok((
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    ))
}

fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Look up an executable by name using the given PATH value rather than
/// the parent process's.
fn look_path(path_env: &str, command: &str) -> Result<PathBuf, String> {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        return Ok(PathBuf::from(command));
    }

    for dir in std::env::split_paths(path_env) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let path = dir.join(command);

        #[cfg(not(windows))]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                    return Ok(path);
                }
            }
        }

        #[cfg(windows)]
        {
            for candidate in [path.clone(), path.with_extension("exe")] {
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    Err(format!("executable not found: {}", command))
}
