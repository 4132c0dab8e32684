//! `OrchestratorActor`: Fleet-wide orchestration
//!
//! Keeps the registry of `HostActor`s and fans sessions out across them in
//! batches. Hosts never wait on each other beyond the batch boundary, and a
//! failure on one host has no effect on the others.

use std::collections::HashMap;
use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use rhelpatch_exec::RemoteExecutor;
use rhelpatch_pkg::PackageManager;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::actor::host::{HostActor, HostActorArgs};
use crate::config::{HostConfig, PatchConfig, RebootTiming};
use crate::error::CoreError;
use crate::event::PatchEvent;
use crate::health::HealthCheck;
use crate::message::{
    FleetReport, GetHostStatus, GetStatus, HostStatus, ListHosts, RegisterHost, RunFleet, RunHost,
    RunSession, UnregisterHost,
};
use crate::session::HostPatchSession;

/// Package tooling for one host
pub struct HostTooling {
    pub package_manager: Arc<dyn PackageManager>,
    /// Privileged commands must be prefixed with `sudo -n`
    pub use_sudo: bool,
}

/// Factory trait for creating `HostActor` dependencies
///
/// Allows injection of different executors/package managers per host.
#[async_trait::async_trait]
pub trait HostActorFactory: Send + Sync {
    /// Create a remote executor for the given host config
    async fn create_executor(
        &self,
        config: &HostConfig,
    ) -> Result<Arc<dyn RemoteExecutor>, CoreError>;

    /// Detect the package manager and privilege mode over `executor`
    async fn create_tooling(
        &self,
        config: &HostConfig,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<HostTooling, CoreError>;
}

/// Arguments for spawning an `OrchestratorActor`
pub struct OrchestratorActorArgs {
    pub host_factory: Arc<dyn HostActorFactory>,
    pub patch: Arc<PatchConfig>,
    pub reboot_timing: Option<RebootTiming>,
    /// Run against every host during post-check
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
    pub event_tx: broadcast::Sender<PatchEvent>,
}

impl OrchestratorActorArgs {
    /// Event broadcast channel capacity
    pub const EVENT_CAPACITY: usize = 1024;

    pub fn new(host_factory: Arc<dyn HostActorFactory>, patch: PatchConfig) -> Self {
        let (event_tx, _) = broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            host_factory,
            patch: Arc::new(patch),
            reboot_timing: None,
            health_checks: Vec::new(),
            event_tx,
        }
    }

    #[must_use]
    pub fn with_health_checks(mut self, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        self.health_checks = checks;
        self
    }

    #[must_use]
    pub fn with_reboot_timing(mut self, timing: RebootTiming) -> Self {
        self.reboot_timing = Some(timing);
        self
    }

    /// Subscribe before spawning to see every event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PatchEvent> {
        self.event_tx.subscribe()
    }
}

/// Fleet orchestrator managing all host actors
pub struct OrchestratorActor {
    hosts: HashMap<String, ActorRef<HostActor>>,
    configs: HashMap<String, HostConfig>,
    host_factory: Arc<dyn HostActorFactory>,
    patch: Arc<PatchConfig>,
    reboot_timing: Option<RebootTiming>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    event_tx: broadcast::Sender<PatchEvent>,
}

impl OrchestratorActor {
    fn spawn_host_actor(&self, config: HostConfig) -> ActorRef<HostActor> {
        let args = HostActorArgs {
            config: config.clone(),
            factory: self.host_factory.clone(),
            patch: self.patch.clone(),
            reboot_timing: self.reboot_timing,
            health_checks: self.health_checks.clone(),
            event_tx: self.event_tx.clone(),
        };

        let actor_ref = HostActor::spawn(args);
        info!(host = %config.name, "spawned HostActor");
        actor_ref
    }

    fn host(&self, hostname: &str) -> Result<&ActorRef<HostActor>, CoreError> {
        self.hosts
            .get(hostname)
            .ok_or_else(|| CoreError::HostNotFound(hostname.to_string()))
    }
}

impl Actor for OrchestratorActor {
    type Args = OrchestratorActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        args.patch.validate()?;
        info!(id = %actor_ref.id(), "OrchestratorActor starting");

        Ok(Self {
            hosts: HashMap::new(),
            configs: HashMap::new(),
            host_factory: args.host_factory,
            patch: args.patch,
            reboot_timing: args.reboot_timing,
            health_checks: args.health_checks,
            event_tx: args.event_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "OrchestratorActor stopping");

        for (name, actor_ref) in &self.hosts {
            info!(host = %name, "stopping HostActor");
            actor_ref.stop_gracefully().await.ok();
        }

        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterHost> for OrchestratorActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RegisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = msg.config.name.clone();

        if self.hosts.contains_key(&name) {
            return Err(CoreError::HostAlreadyExists(name));
        }

        let actor_ref = self.spawn_host_actor(msg.config.clone());
        self.hosts.insert(name.clone(), actor_ref);
        self.configs.insert(name, msg.config);

        Ok(())
    }
}

impl Message<UnregisterHost> for OrchestratorActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: UnregisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = &msg.hostname;

        if let Some(actor_ref) = self.hosts.remove(name) {
            self.configs.remove(name);
            actor_ref.stop_gracefully().await.ok();
            info!(host = %name, "unregistered host");
            Ok(())
        } else {
            Err(CoreError::HostNotFound(name.clone()))
        }
    }
}

impl Message<GetHostStatus> for OrchestratorActor {
    type Reply = Result<HostStatus, CoreError>;

    async fn handle(
        &mut self,
        msg: GetHostStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.host(&msg.hostname)?
            .ask(GetStatus)
            .await
            .map_err(|e| CoreError::ActorError(e.to_string()))
    }
}

impl Message<ListHosts> for OrchestratorActor {
    type Reply = Vec<HostStatus>;

    async fn handle(
        &mut self,
        _msg: ListHosts,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut statuses = Vec::with_capacity(self.hosts.len());

        for (name, actor_ref) in &self.hosts {
            match actor_ref.ask(GetStatus).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!(host = %name, error = %e, "failed to get host status");
                }
            }
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

impl Message<RunHost> for OrchestratorActor {
    type Reply = Result<HostPatchSession, CoreError>;

    async fn handle(&mut self, msg: RunHost, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.host(&msg.hostname)?
            .ask(RunSession { phases: msg.phases })
            .await
            .map_err(|e| CoreError::ActorError(e.to_string()))
    }
}

impl Message<RunFleet> for OrchestratorActor {
    type Reply = Result<FleetReport, CoreError>;

    async fn handle(
        &mut self,
        msg: RunFleet,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let config = msg.config;
        if config.batch_size == 0 {
            return Err(CoreError::ConfigError(
                "batch size must be greater than zero".into(),
            ));
        }

        let mut selected: Vec<_> = self
            .hosts
            .iter()
            .filter(|(name, _)| match (&config.filter, self.configs.get(*name)) {
                (Some(filter), Some(hc)) => filter.matches(hc),
                _ => true,
            })
            .map(|(name, actor)| (name.clone(), actor.clone()))
            .collect();
        selected.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            total_hosts = selected.len(),
            batch_size = config.batch_size,
            "starting fleet run"
        );

        let mut report = FleetReport::default();
        for batch in selected.chunks(config.batch_size) {
            let mut handles = Vec::with_capacity(batch.len());

            for (name, actor_ref) in batch {
                let actor = actor_ref.clone();
                let phases = config.phases;
                let handle = tokio::spawn(async move { actor.ask(RunSession { phases }).await });
                handles.push((name.clone(), handle));
            }

            for (name, handle) in handles {
                let session = match handle.await {
                    Ok(Ok(session)) => session,
                    Ok(Err(e)) => {
                        error!(host = %name, error = %e, "host actor did not answer");
                        HostPatchSession::failed_to_start(
                            name,
                            &CoreError::ActorError(e.to_string()),
                        )
                    }
                    Err(e) => {
                        error!(host = %name, error = %e, "session task panicked");
                        HostPatchSession::failed_to_start(
                            name,
                            &CoreError::ActorError(e.to_string()),
                        )
                    }
                };

                if session.outcome().is_success() {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
                report.sessions.push(session);
            }
        }

        info!(
            total = report.total(),
            succeeded = report.succeeded,
            failed = report.failed,
            "fleet run finished"
        );

        Ok(report)
    }
}
