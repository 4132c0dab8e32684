//! Error types for rhelpatch-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a command on a host
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Could not open a transport to the host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport opened but the host rejected our credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command did not finish in time
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key could not be loaded
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Local process could not be spawned
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Channel or pipe failure mid-command
    #[error("I/O error: {0}")]
    IoError(String),

    /// No session established
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Whether the error means the host could not be reached at all
    ///
    /// Authentication and key errors are configuration problems and are not
    /// counted as reachability failures.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::Timeout { .. }
                | ExecError::NotConnected
                | ExecError::IoError(_)
        )
    }
}
