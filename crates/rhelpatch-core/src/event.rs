//! Status events streamed while sessions run

use serde::{Deserialize, Serialize};

use crate::session::HostOutcome;
use crate::state::SessionPhase;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PatchEvent {
    HostRegistered {
        host: String,
    },
    HostRemoved {
        host: String,
        reason: String,
    },
    SessionStarted {
        host: String,
    },
    PhaseChanged {
        host: String,
        from: SessionPhase,
        to: SessionPhase,
    },
    /// Human-readable status line for the current phase
    Status {
        host: String,
        phase: SessionPhase,
        message: String,
    },
    SessionFinished {
        host: String,
        outcome: HostOutcome,
    },
}

impl PatchEvent {
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            PatchEvent::HostRegistered { host }
            | PatchEvent::HostRemoved { host, .. }
            | PatchEvent::SessionStarted { host }
            | PatchEvent::PhaseChanged { host, .. }
            | PatchEvent::Status { host, .. }
            | PatchEvent::SessionFinished { host, .. } => host,
        }
    }
}
