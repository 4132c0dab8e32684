//! Per-host session state machine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases of a host patch session
///
/// ```text
/// START -> PRECHECK -> UPDATE -> DECIDE_REBOOT -> (REBOOT -> WAIT_REACHABLE)?
///       -> ADVISORY_REBOOT_CHECK -> (REBOOT -> WAIT_REACHABLE)? -> POSTCHECK -> DONE
/// ```
///
/// `PRECHECK_FAILED`, `UPDATE_FAILED` and `REBOOT_TIMEOUT` are terminal
/// failures. Phase selection may skip whole groups, so `PRECHECK` can go
/// straight to `DONE` and `START` straight to `POSTCHECK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Start,
    Precheck,
    Update,
    DecideReboot,
    Reboot,
    WaitReachable,
    AdvisoryRebootCheck,
    Postcheck,
    Done,
    PrecheckFailed,
    UpdateFailed,
    RebootTimeout,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::{
            AdvisoryRebootCheck, DecideReboot, Done, Postcheck, Precheck, PrecheckFailed, Reboot,
            RebootTimeout, Start, Update, UpdateFailed, WaitReachable,
        };

        matches!(
            (self, next),
            (Start, Precheck | Postcheck | PrecheckFailed)
                | (Precheck, Update | Postcheck | Done | PrecheckFailed)
                | (Update, DecideReboot | UpdateFailed)
                | (DecideReboot, Reboot | AdvisoryRebootCheck | UpdateFailed)
                | (Reboot, WaitReachable | RebootTimeout)
                | (WaitReachable, AdvisoryRebootCheck | Postcheck | Done | RebootTimeout)
                | (AdvisoryRebootCheck, Reboot | Postcheck | Done)
                | (Postcheck, Done)
        )
    }

    /// Session is over, successfully or not
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Done
                | SessionPhase::PrecheckFailed
                | SessionPhase::UpdateFailed
                | SessionPhase::RebootTimeout
        )
    }

    #[must_use]
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != SessionPhase::Done
    }

    /// Terminal state a fatal error in this phase leads to
    ///
    /// `None` for phases that never fail the session.
    #[must_use]
    pub fn failure_state(self) -> Option<SessionPhase> {
        match self {
            SessionPhase::Start | SessionPhase::Precheck => Some(SessionPhase::PrecheckFailed),
            SessionPhase::Update | SessionPhase::DecideReboot => Some(SessionPhase::UpdateFailed),
            SessionPhase::Reboot | SessionPhase::WaitReachable => Some(SessionPhase::RebootTimeout),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Start => "START",
            SessionPhase::Precheck => "PRECHECK",
            SessionPhase::Update => "UPDATE",
            SessionPhase::DecideReboot => "DECIDE_REBOOT",
            SessionPhase::Reboot => "REBOOT",
            SessionPhase::WaitReachable => "WAIT_REACHABLE",
            SessionPhase::AdvisoryRebootCheck => "ADVISORY_REBOOT_CHECK",
            SessionPhase::Postcheck => "POSTCHECK",
            SessionPhase::Done => "DONE",
            SessionPhase::PrecheckFailed => "PRECHECK_FAILED",
            SessionPhase::UpdateFailed => "UPDATE_FAILED",
            SessionPhase::RebootTimeout => "REBOOT_TIMEOUT",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
