//! Transfer Agent
//!
//! Mirrors a day directory of the output tree to the remote store with
//! `rsync`. The local path handed over is `<output_root>/./YYYY/MM month/DD`;
//! relative mode (`-R`) recreates everything after the `.` remotely.

use crate::error::{Result, SyncError};
use bridge_traits::process::{CommandSpec, ProcessRunner};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Archive, compress, itemize changes, keep relative paths.
pub const MIRROR_FLAGS: &str = "-avzitR";

/// Outcome of one mirror invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub exit_code: i32,
    /// Captured stdout on success, stderr on failure
    pub output: String,
}

impl TransferResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct TransferAgent {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    remote_url: String,
    module: String,
}

impl TransferAgent {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        remote_url: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            program: "rsync".to_string(),
            remote_url: remote_url.into(),
            module: module.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// `<remote_url>/<module>`
    pub fn destination(&self) -> String {
        format!(
            "{}/{}",
            self.remote_url.trim_end_matches('/'),
            self.module.trim_matches('/')
        )
    }

    /// Builds the mirror command for `local_subtree`.
    ///
    /// # Errors
    ///
    /// `RemotePath` when the path is not valid UTF-8 or lacks the `/./`
    /// marker relative mode depends on.
    pub fn transfer_command(&self, local_subtree: &Path) -> Result<CommandSpec> {
        let local = local_subtree
            .to_str()
            .filter(|p| p.contains("/./"))
            .ok_or_else(|| SyncError::RemotePath {
                path: local_subtree.to_path_buf(),
            })?;

        Ok(CommandSpec::new(&self.program)
            .arg(local)
            .arg(self.destination())
            .args([MIRROR_FLAGS, "--progress", "--exclude", ".*"]))
    }

    /// Runs the mirror tool for one day directory.
    ///
    /// A non-zero exit is returned in the result; only a failure to launch
    /// the tool is an error.
    pub async fn transfer(&self, local_subtree: &Path) -> Result<TransferResult> {
        let command = self.transfer_command(local_subtree)?;
        info!(command = %command, "Transferring");

        let output = self.runner.run(&command).await?;
        let result = if output.success() {
            TransferResult {
                exit_code: output.exit_code,
                output: output.stdout,
            }
        } else {
            TransferResult {
                exit_code: output.exit_code,
                output: output.stderr,
            }
        };

        if result.success() {
            debug!(output = %result.output, "Transfer output");
        } else {
            warn!(exit_code = result.exit_code, output = %result.output, "Transfer failed");
        }
        Ok(result)
    }

    /// Whether the remote endpoint answers a module listing.
    pub async fn healthcheck(&self) -> bool {
        let command = CommandSpec::new(&self.program).arg(&self.remote_url);
        match self.runner.run(&command).await {
            Ok(output) if output.success() => {
                info!(remote = %self.remote_url, "Remote store reachable");
                true
            }
            Ok(output) => {
                warn!(
                    remote = %self.remote_url,
                    exit_code = output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Remote store health check failed"
                );
                false
            }
            Err(e) => {
                warn!(remote = %self.remote_url, error = %e, "Cannot run health check");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::process::ProcessOutput;
    use core_library::FileMapping;
    use std::sync::Mutex;

    struct ScriptedRunner {
        exit_code: i32,
        launched: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn exiting(exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                exit_code,
                launched: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, command: &CommandSpec) -> BridgeResult<ProcessOutput> {
            self.launched.lock().unwrap().push(command.clone());
            Ok(ProcessOutput {
                exit_code: self.exit_code,
                stdout: "sent 120 bytes".to_string(),
                stderr: "@ERROR: Unknown module 'navidrome'".to_string(),
            })
        }
    }

    struct MissingBinary;

    #[async_trait]
    impl ProcessRunner for MissingBinary {
        async fn run(&self, command: &CommandSpec) -> BridgeResult<ProcessOutput> {
            Err(BridgeError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn agent(runner: Arc<dyn ProcessRunner>) -> TransferAgent {
        TransferAgent::new(runner, "rsync://mbp@nas:12000/", "navidrome")
    }

    #[test]
    fn test_transfer_command() {
        let mapping = FileMapping::new(
            "/in/t.aiff",
            "/data/tracks-output/2022/04 april/24/Gloria Jones/Single/t.mp3",
        )
        .unwrap();

        let command = agent(ScriptedRunner::exiting(0))
            .transfer_command(&mapping.remote_relative_path())
            .unwrap();

        assert_eq!(command.program, "rsync");
        assert_eq!(
            command.args,
            vec![
                "/data/tracks-output/./2022/04 april/24",
                "rsync://mbp@nas:12000/navidrome",
                "-avzitR",
                "--progress",
                "--exclude",
                ".*",
            ]
        );
    }

    #[test]
    fn test_transfer_command_requires_relative_marker() {
        let err = agent(ScriptedRunner::exiting(0))
            .transfer_command(Path::new("/data/2022/04 april/24"))
            .unwrap_err();
        assert!(matches!(err, SyncError::RemotePath { .. }));
    }

    #[tokio::test]
    async fn test_transfer_captures_output() {
        let ok = agent(ScriptedRunner::exiting(0))
            .transfer(Path::new("/out/./2024/01 january/05"))
            .await
            .unwrap();
        assert!(ok.success());
        assert_eq!(ok.output, "sent 120 bytes");

        let failed = agent(ScriptedRunner::exiting(5))
            .transfer(Path::new("/out/./2024/01 january/05"))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, 5);
        assert!(failed.output.contains("Unknown module"));
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let runner = ScriptedRunner::exiting(0);
        assert!(agent(runner.clone()).healthcheck().await);
        assert_eq!(
            runner.launched.lock().unwrap()[0].args,
            vec!["rsync://mbp@nas:12000/"]
        );

        assert!(!agent(ScriptedRunner::exiting(10)).healthcheck().await);
        assert!(!agent(Arc::new(MissingBinary)).healthcheck().await);
    }
}
