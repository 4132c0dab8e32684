//! `HostActor`: Per-host session owner
//!
//! Owns the connection to one host and runs its patch sessions one at a
//! time. Executor and package tooling are created on the first session so an
//! unreachable host can still be registered and reported on.

use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use rhelpatch_exec::RemoteExecutor;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actor::orchestrator::HostActorFactory;
use crate::config::{HostConfig, PatchConfig, RebootTiming};
use crate::error::CoreError;
use crate::event::PatchEvent;
use crate::health::HealthCheck;
use crate::message::{GetStatus, HostStatus, RunSession};
use crate::session::{HostOutcome, HostPatchSession, SessionRunner};

/// Arguments for spawning a `HostActor`
pub struct HostActorArgs {
    pub config: HostConfig,
    /// Builds the executor and package manager on first use
    pub factory: Arc<dyn HostActorFactory>,
    pub patch: Arc<PatchConfig>,
    /// Overrides the timings derived from `patch`
    pub reboot_timing: Option<RebootTiming>,
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
    pub event_tx: broadcast::Sender<PatchEvent>,
}

/// Per-host actor running patch sessions
pub struct HostActor {
    config: HostConfig,
    factory: Arc<dyn HostActorFactory>,
    patch: Arc<PatchConfig>,
    reboot_timing: Option<RebootTiming>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    event_tx: broadcast::Sender<PatchEvent>,
    executor: Option<Arc<dyn RemoteExecutor>>,
    runner: Option<Arc<SessionRunner>>,
    last_session: Option<HostPatchSession>,
    sessions_run: u32,
}

impl HostActor {
    /// Build the runner, reusing the executor from an earlier attempt
    async fn runner(&mut self) -> Result<Arc<SessionRunner>, CoreError> {
        if let Some(runner) = &self.runner {
            return Ok(runner.clone());
        }

        let executor = match &self.executor {
            Some(executor) => executor.clone(),
            None => {
                let executor = self.factory.create_executor(&self.config).await?;
                self.executor = Some(executor.clone());
                executor
            }
        };

        let tooling = self
            .factory
            .create_tooling(&self.config, executor.clone())
            .await?;
        debug!(
            host = %self.config.name,
            executor = executor.executor_type(),
            manager = %tooling.package_manager.manager_type(),
            sudo = tooling.use_sudo,
            "host tooling ready"
        );

        let mut runner = SessionRunner::new(
            self.config.name.clone(),
            self.patch.clone(),
            executor,
            tooling.package_manager,
            self.event_tx.clone(),
        )
        .with_health_checks(self.health_checks.clone())
        .with_sudo(tooling.use_sudo);
        if let Some(timing) = self.reboot_timing {
            runner = runner.with_reboot_timing(timing);
        }

        let runner = Arc::new(runner);
        self.runner = Some(runner.clone());
        Ok(runner)
    }

    fn status(&self) -> HostStatus {
        HostStatus {
            name: self.config.name.clone(),
            addr: self.config.addr.clone(),
            tags: self.config.tags.clone(),
            last_phase: self.last_session.as_ref().map(HostPatchSession::phase),
            last_outcome: self.last_session.as_ref().map(HostPatchSession::outcome),
            last_run: self
                .last_session
                .as_ref()
                .map(|s| s.finished_at.unwrap_or(s.started_at)),
            sessions_run: self.sessions_run,
        }
    }

    fn emit(&self, event: PatchEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Actor for HostActor {
    type Args = HostActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(host = %args.config.name, id = %actor_ref.id(), "HostActor starting");

        let _ = args.event_tx.send(PatchEvent::HostRegistered {
            host: args.config.name.clone(),
        });

        Ok(Self {
            config: args.config,
            factory: args.factory,
            patch: args.patch,
            reboot_timing: args.reboot_timing,
            health_checks: args.health_checks,
            event_tx: args.event_tx,
            executor: None,
            runner: None,
            last_session: None,
            sessions_run: 0,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(host = %self.config.name, reason = ?reason, "HostActor stopping");

        if let Some(executor) = &self.executor
            && let Err(e) = executor.reset().await
        {
            warn!(host = %self.config.name, error = %e, "failed to close connection");
        }

        self.emit(PatchEvent::HostRemoved {
            host: self.config.name.clone(),
            reason: format!("{reason:?}"),
        });
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RunSession> for HostActor {
    type Reply = HostPatchSession;

    async fn handle(
        &mut self,
        msg: RunSession,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let session = match self.runner().await {
            Ok(runner) => runner.run(msg.phases).await,
            Err(e) => {
                warn!(host = %self.config.name, error = %e, "could not prepare host");
                let session = HostPatchSession::failed_to_start(self.config.name.clone(), &e);
                self.emit(PatchEvent::SessionStarted {
                    host: self.config.name.clone(),
                });
                self.emit(PatchEvent::SessionFinished {
                    host: self.config.name.clone(),
                    outcome: session.outcome(),
                });
                session
            }
        };

        if matches!(session.outcome(), HostOutcome::Failed { .. }) && self.runner.is_some() {
            // Drop a possibly dead connection; the next session reconnects
            if let Some(executor) = &self.executor {
                let _ = executor.reset().await;
            }
        }

        self.sessions_run += 1;
        self.last_session = Some(session.clone());
        session
    }
}

impl Message<GetStatus> for HostActor {
    type Reply = HostStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.status()
    }
}
