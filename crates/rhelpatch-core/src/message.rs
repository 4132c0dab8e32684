//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use chrono::{DateTime, Utc};
use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

use crate::config::{FleetRunConfig, HostConfig, PhaseSelection};
use crate::session::{HostOutcome, HostPatchSession};
use crate::state::SessionPhase;

// ============================================================================
// HostActor Messages
// ============================================================================

/// Run one patch session against the host
#[derive(Debug, Clone, Copy)]
pub struct RunSession {
    pub phases: PhaseSelection,
}

/// Get full host status
#[derive(Debug)]
pub struct GetStatus;

/// Host status response
#[derive(Debug, Clone, Serialize, Deserialize, Reply)]
pub struct HostStatus {
    pub name: String,
    pub addr: String,
    pub tags: Vec<String>,
    /// Phase of the last session, `None` if no session ran yet
    pub last_phase: Option<SessionPhase>,
    pub last_outcome: Option<HostOutcome>,
    pub last_run: Option<DateTime<Utc>>,
    /// Number of sessions run by this actor
    pub sessions_run: u32,
}

// ============================================================================
// OrchestratorActor Messages
// ============================================================================

/// Register a new host with the orchestrator
#[derive(Debug)]
pub struct RegisterHost {
    pub config: HostConfig,
}

/// Unregister a host from the orchestrator
#[derive(Debug)]
pub struct UnregisterHost {
    pub hostname: String,
}

/// Get status of a specific host
#[derive(Debug)]
pub struct GetHostStatus {
    pub hostname: String,
}

/// List all managed hosts
#[derive(Debug)]
pub struct ListHosts;

/// Run a session for a single registered host
#[derive(Debug)]
pub struct RunHost {
    pub hostname: String,
    pub phases: PhaseSelection,
}

/// Run sessions across every registered host matching the filter
#[derive(Debug)]
pub struct RunFleet {
    pub config: FleetRunConfig,
}

/// Result of a fleet run
#[derive(Debug, Clone, Default, Serialize, Deserialize, Reply)]
pub struct FleetReport {
    /// Finished sessions, sorted by host name
    pub sessions: Vec<HostPatchSession>,
    pub succeeded: usize,
    pub failed: usize,
}

impl FleetReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.sessions.len()
    }
}
