//! Local command execution using `tokio::process`
//!
//! Used when a host's address is `localhost`, which lets the patch run on the
//! control node itself without an SSH round-trip.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::RemoteExecutor;

/// Local command executor
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn shell(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let started = Instant::now();

        // sh -c so pipes and redirections behave as they do over SSH
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let result = CommandResult {
            status: shell_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(command = %cmd, status = result.status, "local command finished");
        Ok(result)
    }
}

/// Exit code as a shell reports it: 128 + signal number when killed
fn shell_status(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.shell(cmd).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        // kill_on_drop reaps the child when the timeout drops the future
        timeout(timeout_duration, self.shell(cmd))
            .await
            .unwrap_or_else(|_| {
                warn!(command = %cmd, timeout = ?timeout_duration, "local command timed out");
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            })
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
