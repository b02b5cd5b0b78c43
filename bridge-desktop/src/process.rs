//! Process Execution using `tokio::process`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    process::{CommandSpec, ProcessOutput, ProcessRunner},
};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Runs external tools as child processes, capturing stdout and stderr.
///
/// Standard input is closed so tools that would prompt (e.g. `ffmpeg` asking
/// to overwrite) fail instead of blocking the run.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        debug!(command = %command, "run command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BridgeError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(program = %command.program, exit_code = result.exit_code, "command finished");

        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = TokioProcessRunner::new();
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_split() {
        let runner = TokioProcessRunner::new();
        let output = runner
            .run(&CommandSpec::new("printf").args(["%s|", "04 april", "x y"]))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "04 april|x y|");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-program-4d1f"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Spawn { .. }));
    }
}
