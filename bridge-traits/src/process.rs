//! External Process Abstraction
//!
//! Encoding, probing and mirroring are delegated to external tools
//! (`ffmpeg`, `ffprobe`, `rsync`). The [`ProcessRunner`] trait lets the core
//! describe an invocation as data and have the host execute it.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

/// A single external command invocation.
///
/// Arguments are passed to the program verbatim; no shell is involved, so
/// paths containing spaces or quotes need no escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('\'') {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external commands and captures their output.
///
/// A non-zero exit code is NOT an error at this layer; callers decide how
/// to treat it. Errors are reserved for failures to launch or wait on the
/// process.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput>;
}
