//! Core error types for rhelpatch-core

use std::time::Duration;

use thiserror::Error;

use crate::state::SessionPhase;

/// Errors raised while driving a patch session
///
/// `Connectivity`, `Update` and `RebootTimeout` end the session for that host
/// only. `AdvisoryCheck` is never fatal: the session logs it and carries on as
/// if no reboot were needed.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Host could not be reached
    #[error("host unreachable: {0}")]
    Connectivity(String),

    /// A fact the session depends on could not be read
    #[error("fact collection failed: {0}")]
    Facts(String),

    /// Package operation failed
    #[error("update failed: {0}")]
    Update(String),

    /// Host did not come back within the reboot timeout
    #[error("host did not become reachable within {timeout:?} after reboot")]
    RebootTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Reboot command was rejected by the host
    #[error("reboot command failed: {0}")]
    Reboot(String),

    /// Advisory reboot check exited unexpectedly
    #[error("advisory reboot check inconclusive: {0}")]
    AdvisoryCheck(String),

    /// A second reboot was attempted in the same session
    #[error("host {0} was already rebooted in this session")]
    AlreadyRebooted(String),

    /// The reboot decision was computed twice
    #[error("reboot decision already made for {0}")]
    DecisionAlreadyMade(String),

    /// Invalid phase transition attempted
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase
        from: SessionPhase,
        /// Attempted target phase
        to: SessionPhase,
    },

    /// Host not found in registry
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Host already exists in registry
    #[error("host already exists: {0}")]
    HostAlreadyExists(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}
