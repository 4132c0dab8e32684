//! Remote executor trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs shell commands on a target host
///
/// Implementations must be shareable across tasks; a patch session holds the
/// executor behind an `Arc` for its whole lifetime, including across reboots.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and collect its output
    ///
    /// A non-zero exit status is not an error; inspect `CommandResult::status`.
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Run a command, failing with `ExecError::Timeout` if it does not finish in time
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Drop any cached transport so the next command opens a fresh connection
    ///
    /// Called while waiting for a host to come back from a reboot, where the
    /// previous session is known to be dead.
    async fn reset(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Whether a transport is currently established
    fn is_connected(&self) -> bool {
        true
    }

    /// Short name for logs ("ssh", "local", ...)
    fn executor_type(&self) -> &'static str;
}
