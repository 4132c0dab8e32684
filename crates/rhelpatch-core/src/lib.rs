//! rhelpatch-core: Patch sessions and fleet orchestration
//!
//! A `SessionRunner` drives one host through pre-check, update, reboot
//! decision, bounded reboot wait, advisory reboot check and post-check.
//! `HostActor` owns one host's connection and runs its sessions;
//! `OrchestratorActor` fans sessions out across the fleet in batches.

pub mod actor;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod message;
pub mod reboot;
pub mod session;
pub mod state;

pub use actor::host::{HostActor, HostActorArgs};
pub use actor::orchestrator::{
    HostActorFactory, HostTooling, OrchestratorActor, OrchestratorActorArgs,
};
pub use config::{
    FleetFilter, FleetRunConfig, HostConfig, PatchConfig, PhaseSelection, PhaseTag, RebootTiming,
};
pub use error::CoreError;
pub use event::PatchEvent;
pub use health::{CommandHealthCheck, HealthCheck, HealthCheckConfig, HealthReport};
pub use message::{
    FleetReport, GetHostStatus, GetStatus, HostStatus, ListHosts, RegisterHost, RunFleet, RunHost,
    RunSession, UnregisterHost,
};
pub use reboot::{AdvisoryVerdict, PostAction, RebootDecision, RebootOutcome, RebootReason};
pub use session::{
    HostOutcome, HostPatchSession, PhaseMessage, PostcheckReport, PrecheckReport, SessionRunner,
    UpdateOutcome, UpdateStatus,
};
pub use state::SessionPhase;
