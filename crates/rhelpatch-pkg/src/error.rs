//! Error types for rhelpatch-pkg

use thiserror::Error;

/// Errors that can occur during package operations
#[derive(Error, Debug, Clone)]
pub enum PackageError {
    /// Neither dnf nor yum is installed
    #[error("package manager not found: {0}")]
    ManagerNotFound(String),

    /// Repository metadata could not be fetched
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Another process holds the rpm/dnf lock
    #[error("lock file conflict: {0}")]
    LockConflict(String),

    /// Insufficient permissions (need sudo)
    #[error("insufficient permissions: {0}")]
    PermissionDenied(String),

    /// Command exited with an unexpected status
    #[error("command failed: {status} - {message}")]
    CommandFailed {
        /// Exit status
        status: i32,
        /// Error message
        message: String,
    },

    /// Failed to parse command output
    #[error("parse error: {0}")]
    ParseError(String),

    /// Execution error from remote executor
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Invalid repository id or similar
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl PackageError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PackageError::LockConflict(_) | PackageError::RepositoryUnavailable(_)
        )
    }

    /// Classify a failed dnf/yum invocation by its stderr
    pub(crate) fn from_failure(status: i32, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("lock") && (lower.contains("waiting") || lower.contains("held")) {
            PackageError::LockConflict(stderr.trim().to_string())
        } else if lower.contains("this command has to be run with superuser privileges")
            || lower.contains("you need to be root")
        {
            PackageError::PermissionDenied(stderr.trim().to_string())
        } else if lower.contains("failed to download metadata")
            || lower.contains("cannot download repomd.xml")
        {
            PackageError::RepositoryUnavailable(stderr.trim().to_string())
        } else {
            PackageError::CommandFailed {
                status,
                message: stderr.trim().to_string(),
            }
        }
    }
}
