//! Side-channel verification and propagation waiting
//!
//! Zone changes made through the CLI propagate asynchronously to an export
//! target. Before the export can be checked (or queried with a resolver),
//! the queue of pending updates has to drain. Draining is observed by
//! polling a counter and, while it is non-zero, blocking on the export
//! listener's output until it reports progress. Every wait is bounded: a
//! queue that does not drain in time is reported as stalled.

use std::io::Read;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use crate::command::CliCommand;
use crate::error::{ErrorKind, TranscriptError};
use crate::exec::{shell, spawn_and_wait};

/// Line appended to the output when the export diverges
pub const EXPORT_MISMATCH: &str = "Zone incorrectly exported";

/// Interval between polls when no listener output can be waited on
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Checks that a mutating command's effect reached the export target
pub trait SideChannel {
    fn verify(&mut self, command: &CliCommand) -> Result<bool, TranscriptError>;
}

/// A queue of downstream updates that have not been applied yet
pub trait Backlog {
    /// Number of pending updates
    fn pending(&mut self) -> Result<u64, TranscriptError>;

    /// Block until the consumer shows progress or `timeout` passes.
    fn wait_for_progress(&mut self, timeout: Duration) -> Result<(), TranscriptError>;
}

/// Poll `backlog` until it is empty, failing with a stalled error once
/// `timeout` has passed.
pub fn wait_until_drained(backlog: &mut dyn Backlog, timeout: Duration) -> Result<(), TranscriptError> {
    let deadline = Instant::now() + timeout;
    loop {
        let pending = backlog.pending()?;
        if pending == 0 {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(TranscriptError::stalled(format!(
                "{} update(s) still pending after {:?}",
                pending, timeout
            )));
        }
        tracing::trace!(pending, "waiting for export queue");
        backlog.wait_for_progress(deadline - now)?;
    }
}

/// A long-running export listener whose output signals progress
pub struct Listener {
    child: Child,
    output: Receiver<Vec<u8>>,
}

impl Listener {
    /// Start `command` through the shell and read its stdout in the background.
    pub fn spawn(command: &str, workdir: &std::path::Path, env: &[(String, String)]) -> Result<Self, TranscriptError> {
        let mut cmd = shell(command);
        cmd.current_dir(workdir);
        cmd.env_clear();
        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        // own process group, so background children die with the listener
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|e| {
            TranscriptError::command_failed(format!("failed to start listener '{}': {}", command, e))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TranscriptError::command_failed("listener stdout not captured")
        })?;
        tracing::debug!(command, pid = child.id(), "export listener started");
        Ok(Self {
            child,
            output: spawn_reader(stdout),
        })
    }

    /// Wait for the next chunk of listener output.
    fn recv(&self, timeout: Duration) -> Result<(), TranscriptError> {
        match self.output.recv_timeout(timeout) {
            Ok(_) | Err(RecvTimeoutError::Timeout) => Ok(()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TranscriptError::command_failed("export listener exited"))
            }
        }
    }
}

impl Listener {
    /// Kill the listener's whole process group and reap it.
    fn shutdown(&mut self) {
        #[cfg(unix)]
        {
            if let Ok(pid) = i32::try_from(self.child.id()) {
                let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel();
    thread::spawn(move || {
        let mut buffer = [0u8; 1024];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// [`Backlog`] whose size is read by a shell query printing the count as its
/// last word (e.g. a `SELECT COUNT(*)` through a database client).
pub struct ShellBacklog {
    query: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    listener: Option<Listener>,
}

impl ShellBacklog {
    pub fn new(query: impl Into<String>, workdir: impl Into<PathBuf>, env: Vec<(String, String)>) -> Self {
        Self {
            query: query.into(),
            workdir: workdir.into(),
            env,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl Backlog for ShellBacklog {
    fn pending(&mut self) -> Result<u64, TranscriptError> {
        let (stdout, stderr, success) = spawn_and_wait(shell(&self.query), &self.workdir, &self.env, None)
            .map_err(|e| TranscriptError::command_failed(format!("failed to run '{}': {}", self.query, e)))?;
        if !success {
            return Err(TranscriptError::command_failed(format!(
                "backlog query failed: {}",
                stderr.trim()
            )));
        }
        parse_count(&stdout)
    }

    fn wait_for_progress(&mut self, timeout: Duration) -> Result<(), TranscriptError> {
        match self.listener {
            Some(ref listener) => listener.recv(timeout),
            None => {
                thread::sleep(timeout.min(IDLE_POLL));
                Ok(())
            }
        }
    }
}

fn parse_count(output: &str) -> Result<u64, TranscriptError> {
    output
        .split_whitespace()
        .last()
        .and_then(|word| word.parse().ok())
        .ok_or_else(|| {
            TranscriptError::new(ErrorKind::Other, format!("backlog query printed no count: {:?}", output))
        })
}

/// [`SideChannel`] that runs a shell command per mutating CLI command.
///
/// The command sees the CLI line in `EMX_COMMAND`; exit status 0 means the
/// export matches.
pub struct ShellVerifier {
    command: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl ShellVerifier {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>, env: Vec<(String, String)>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            env,
        }
    }
}

impl SideChannel for ShellVerifier {
    fn verify(&mut self, command: &CliCommand) -> Result<bool, TranscriptError> {
        let mut env = self.env.clone();
        env.push(("EMX_COMMAND".into(), command.line.clone()));
        let (_, stderr, success) = spawn_and_wait(shell(&self.command), &self.workdir, &env, None)
            .map_err(|e| TranscriptError::command_failed(format!("failed to run '{}': {}", self.command, e)))?;
        if !success {
            tracing::info!(command = %command.line, stderr = %stderr.trim(), "export verification failed");
        }
        Ok(success)
    }
}
