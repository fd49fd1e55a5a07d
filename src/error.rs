//! Transcript errors
//!
//! Comparison mismatches never surface here: they are recorded in the
//! rewritten transcript. These errors are infrastructure failures that
//! abandon the current transcript.

use std::fmt;

/// The kind of transcript error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The CLI under test or a shell command could not be run
    CommandFailed,
    /// Malformed transcript line (e.g. unterminated quote in a command)
    SyntaxError,
    /// A regex in a rule or template failed to compile
    InvalidPattern,
    /// Invalid rule table configuration
    Config,
    /// Downstream propagation did not drain before the deadline
    Stalled,
    /// IO error
    Io,
    /// Other error
    Other,
}

/// A transcript error with file/line context
#[derive(Debug)]
pub struct TranscriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub command: Option<String>,
}

impl TranscriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
            command: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_command(mut self, cmd: impl Into<String>) -> Self {
        self.command = Some(cmd.into());
        self
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, msg)
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, msg)
    }

    pub fn pattern(pattern: &str, err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidPattern, format!("bad pattern {:?}: {}", pattern, err))
    }

    pub fn stalled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stalled, msg)
    }

    pub fn is_stalled(&self) -> bool {
        self.kind == ErrorKind::Stalled
    }
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if let Some(ref cmd) = self.command {
            write!(f, " {}: ", cmd)?;
        } else if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TranscriptError {}

impl From<std::io::Error> for TranscriptError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location_and_command() {
        let err = TranscriptError::command_failed("exit code 2")
            .with_location("t/zone-create", 14)
            .with_command("ndcli create zone a.de");
        assert_eq!(err.to_string(), "t/zone-create:14: ndcli create zone a.de: exit code 2");
    }

    #[test]
    fn test_display_location_only() {
        let err = TranscriptError::syntax("unterminated quoted argument").with_location("t/x", 3);
        assert_eq!(err.to_string(), "t/x:3: unterminated quoted argument");
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TranscriptError = io.into();
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(!err.is_stalled());
    }
}
