//! Per-transcript execution context
//!
//! Holds the collaborators a transcript talks to and its working
//! directory. It is passed explicitly through directive dispatch; nothing
//! about the system under test lives in globals.

use std::path::{Component, Path, PathBuf};
use crate::exec::{CommandRunner, ShellRunner};
use crate::sidechannel::{Backlog, SideChannel};

/// Mutable context for a single transcript replay
pub struct Session {
    /// Working directory for shell commands and redirections
    pub workdir: PathBuf,
    /// The CLI under test
    pub cli: Box<dyn CommandRunner>,
    /// The system shell
    pub shell: Box<dyn ShellRunner>,
    /// Export verification, when enabled
    pub verifier: Option<Box<dyn SideChannel>>,
    /// Pending downstream updates, when configured
    pub backlog: Option<Box<dyn Backlog>>,
    /// Execution log
    pub log: String,
}

impl Session {
    pub fn new(workdir: impl Into<PathBuf>, cli: Box<dyn CommandRunner>, shell: Box<dyn ShellRunner>) -> Self {
        Self {
            workdir: workdir.into(),
            cli,
            shell,
            verifier: None,
            backlog: None,
            log: String::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn SideChannel>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_backlog(mut self, backlog: Box<dyn Backlog>) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Resolve a path relative to the working directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            clean_path(path)
        } else {
            clean_path(&self.workdir.join(path))
        }
    }

    /// Write a log entry
    pub fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

/// Environment for processes started on behalf of a transcript: the parent
/// environment plus `WORK` pointing at the working directory.
pub fn transcript_env(workdir: &Path) -> Vec<(String, String)> {
    let work = workdir.to_string_lossy().to_string();
    let mut env: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| k != "WORK" && k != "PWD")
        .collect();
    env.push(("WORK".into(), work.clone()));
    env.push(("PWD".into(), work));
    env
}

/// Clean a path by resolving `.` and `..` components lexically.
fn clean_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    let mut has_root = false;
    let mut prefix: Option<Component> = None;

    for component in path.components() {
        match component {
            Component::RootDir => {
                has_root = true;
                components.clear();
            }
            Component::Prefix(_) => {
                prefix = Some(component);
                components.clear();
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // '..' at the root of an absolute path is dropped
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if !has_root {
                    components.push(component);
                }
            }
            Component::Normal(_) => components.push(component),
        }
    }

    if components.is_empty() && !has_root && prefix.is_none() {
        return PathBuf::from(".");
    }

    let mut result = PathBuf::new();
    if let Some(p) = prefix {
        result.push(p);
    }
    if has_root {
        result.push(std::path::MAIN_SEPARATOR.to_string());
    }
    for c in &components {
        result.push(c);
    }
    result
}
