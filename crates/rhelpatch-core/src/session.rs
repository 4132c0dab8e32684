//! Host patch session: the per-host state machine and the runner that drives it

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kameo_macros::Reply;
use rhelpatch_exec::RemoteExecutor;
use rhelpatch_inventory::{DiskUsage, FactCollector, HostFacts, KernelVersion};
use rhelpatch_pkg::{PackageManager, RebootAdvice, UpdateResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PatchConfig, PhaseSelection, RebootTiming};
use crate::error::CoreError;
use crate::event::PatchEvent;
use crate::health::{HealthCheck, HealthReport};
use crate::reboot::{
    AdvisoryVerdict, PostAction, RebootDecision, RebootOutcome, RebootReason, wait_for_return,
};
use crate::state::SessionPhase;

/// How the update phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// `perform_update` was false
    Skipped,
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub status: UpdateStatus,
    pub changed: bool,
    pub message: String,
    pub packages: Vec<String>,
}

impl UpdateOutcome {
    fn skipped() -> Self {
        Self {
            status: UpdateStatus::Skipped,
            changed: false,
            message: "skipped: perform_update is false".to_string(),
            packages: Vec::new(),
        }
    }
}

impl From<UpdateResult> for UpdateOutcome {
    fn from(result: UpdateResult) -> Self {
        Self {
            status: if result.changed {
                UpdateStatus::Changed
            } else {
                UpdateStatus::Unchanged
            },
            changed: result.changed,
            message: result.message,
            packages: result.upgraded_packages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckReport {
    pub reachable: bool,
    /// `None` when only the `patch` group was selected
    pub facts: Option<HostFacts>,
    pub installed_packages: Option<usize>,
    pub available_updates: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostcheckReport {
    pub reachable: bool,
    pub running_kernel: Option<KernelVersion>,
    pub uptime: Option<Duration>,
    pub health: Vec<HealthReport>,
}

/// One human-readable status line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMessage {
    pub phase: SessionPhase,
    pub message: String,
}

/// Terminal result of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HostOutcome {
    Success,
    Failed { phase: SessionPhase, error: String },
}

impl HostOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, HostOutcome::Success)
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOutcome::Success => write!(f, "ok"),
            HostOutcome::Failed { phase, error } => write!(f, "{phase}: {error}"),
        }
    }
}

/// State of one host for one run
///
/// Created when the run starts, mutated by each phase, and handed back to the
/// caller as the run's report. Nothing is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, Reply)]
pub struct HostPatchSession {
    pub hostname: String,
    phase: SessionPhase,
    pub pre_kernel: Option<KernelVersion>,
    pub post_kernel: Option<KernelVersion>,
    pub precheck: Option<PrecheckReport>,
    pub update: Option<UpdateOutcome>,
    reboot_decision: Option<RebootDecision>,
    pub advisory: Option<AdvisoryVerdict>,
    reboot: Option<RebootOutcome>,
    pending: VecDeque<PostAction>,
    pub postcheck: Option<PostcheckReport>,
    pub messages: Vec<PhaseMessage>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HostPatchSession {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            phase: SessionPhase::Start,
            pre_kernel: None,
            post_kernel: None,
            precheck: None,
            update: None,
            reboot_decision: None,
            advisory: None,
            reboot: None,
            pending: VecDeque::new(),
            postcheck: None,
            messages: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// A session that could not even start, e.g. because the SSH key is missing
    pub fn failed_to_start(hostname: impl Into<String>, error: &CoreError) -> Self {
        let mut session = Self::new(hostname);
        session.fail(error);
        session
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn reboot_decision(&self) -> Option<&RebootDecision> {
        self.reboot_decision.as_ref()
    }

    #[must_use]
    pub fn reboot(&self) -> Option<&RebootOutcome> {
        self.reboot.as_ref()
    }

    #[must_use]
    pub fn has_rebooted(&self) -> bool {
        self.reboot.is_some()
    }

    #[must_use]
    pub fn pending_actions(&self) -> impl Iterator<Item = &PostAction> {
        self.pending.iter()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    ///
    /// # Errors
    /// Returns `CoreError::InvalidTransition`
    pub fn transition_to(&mut self, next: SessionPhase) -> Result<SessionPhase, CoreError> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        let previous = self.phase;
        self.phase = next;
        Ok(previous)
    }

    /// Record the reboot decision; it can only be made once
    ///
    /// # Errors
    /// Returns `CoreError::DecisionAlreadyMade` on a second call
    pub fn record_decision(&mut self, decision: RebootDecision) -> Result<(), CoreError> {
        if self.reboot_decision.is_some() {
            return Err(CoreError::DecisionAlreadyMade(self.hostname.clone()));
        }
        self.reboot_decision = Some(decision);
        Ok(())
    }

    /// Record that the host was rebooted; at most once per session
    ///
    /// # Errors
    /// Returns `CoreError::AlreadyRebooted` if a reboot was already recorded
    pub fn record_reboot(&mut self, outcome: RebootOutcome) -> Result<(), CoreError> {
        if self.reboot.is_some() {
            return Err(CoreError::AlreadyRebooted(self.hostname.clone()));
        }
        self.reboot = Some(outcome);
        Ok(())
    }

    /// Queue a reboot unless one is already pending
    pub fn queue_reboot(&mut self, reason: RebootReason) {
        if !self
            .pending
            .iter()
            .any(|a| matches!(a, PostAction::Reboot(_)))
        {
            self.pending.push_back(PostAction::Reboot(reason));
        }
    }

    fn next_action(&mut self) -> Option<PostAction> {
        self.pending.pop_front()
    }

    fn note(&mut self, message: impl Into<String>) -> &PhaseMessage {
        self.messages.push(PhaseMessage {
            phase: self.phase,
            message: message.into(),
        });
        // just pushed
        &self.messages[self.messages.len() - 1]
    }

    /// End the session in the failure state matching the current phase
    pub fn fail(&mut self, error: &CoreError) {
        if let Some(terminal) = self.phase.failure_state() {
            self.phase = terminal;
        }
        self.error = Some(error.to_string());
        self.pending.clear();
        self.finished_at = Some(Utc::now());
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn outcome(&self) -> HostOutcome {
        match (self.phase, &self.error) {
            (SessionPhase::Done, None) => HostOutcome::Success,
            (phase, error) => HostOutcome::Failed {
                phase,
                error: error
                    .clone()
                    .unwrap_or_else(|| "session did not finish".to_string()),
            },
        }
    }
}

/// Drives one host through its phases
///
/// Holds everything a session needs to talk to the host. A runner can be
/// reused for any number of runs; each `run` starts a fresh `HostPatchSession`.
pub struct SessionRunner {
    hostname: String,
    config: Arc<PatchConfig>,
    timing: RebootTiming,
    executor: Arc<dyn RemoteExecutor>,
    packages: Arc<dyn PackageManager>,
    facts: FactCollector,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    use_sudo: bool,
    events: broadcast::Sender<PatchEvent>,
}

impl SessionRunner {
    pub fn new(
        hostname: impl Into<String>,
        config: Arc<PatchConfig>,
        executor: Arc<dyn RemoteExecutor>,
        packages: Arc<dyn PackageManager>,
        events: broadcast::Sender<PatchEvent>,
    ) -> Self {
        let timing = RebootTiming::from(config.as_ref());
        Self {
            hostname: hostname.into(),
            config,
            timing,
            facts: FactCollector::new(executor.clone()),
            executor,
            packages,
            health_checks: Vec::new(),
            use_sudo: false,
            events,
        }
    }

    #[must_use]
    pub fn with_health_checks(mut self, checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        self.health_checks = checks;
        self
    }

    #[must_use]
    pub fn with_reboot_timing(mut self, timing: RebootTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Prefix the reboot command with `sudo -n`
    #[must_use]
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Run the selected phases and return the finished session
    ///
    /// Never returns an error: a fatal problem ends the session in a failure
    /// state, which the returned session reports.
    #[instrument(skip(self), fields(host = %self.hostname))]
    pub async fn run(&self, phases: PhaseSelection) -> HostPatchSession {
        let mut session = HostPatchSession::new(&self.hostname);
        self.emit(PatchEvent::SessionStarted {
            host: self.hostname.clone(),
        });

        match self.drive(&mut session, phases).await {
            Ok(()) => session.finish(),
            Err(e) => {
                let failed_in = session.phase();
                session.fail(&e);
                error!(phase = %failed_in, error = %e, "session failed");
                self.emit(PatchEvent::PhaseChanged {
                    host: self.hostname.clone(),
                    from: failed_in,
                    to: session.phase(),
                });
            }
        }

        let outcome = session.outcome();
        info!(outcome = %outcome, "session finished");
        self.emit(PatchEvent::SessionFinished {
            host: self.hostname.clone(),
            outcome,
        });
        session
    }

    async fn drive(
        &self,
        session: &mut HostPatchSession,
        phases: PhaseSelection,
    ) -> Result<(), CoreError> {
        if phases.pre_patch || phases.patch {
            self.advance(session, SessionPhase::Precheck)?;
            self.precheck(session, phases.pre_patch).await?;
        }

        if phases.patch {
            self.advance(session, SessionPhase::Update)?;
            self.update(session).await?;

            self.advance(session, SessionPhase::DecideReboot)?;
            self.decide_reboot(session).await?;
            self.run_post_actions(session).await?;

            self.advance(session, SessionPhase::AdvisoryRebootCheck)?;
            self.advisory_check(session).await;
            self.run_post_actions(session).await?;
        }

        if phases.post_patch {
            self.advance(session, SessionPhase::Postcheck)?;
            self.postcheck(session).await;
        }

        self.advance(session, SessionPhase::Done)?;
        Ok(())
    }

    fn advance(&self, session: &mut HostPatchSession, next: SessionPhase) -> Result<(), CoreError> {
        let from = session.transition_to(next)?;
        info!(host = %self.hostname, %from, to = %next, "phase transition");
        self.emit(PatchEvent::PhaseChanged {
            host: self.hostname.clone(),
            from,
            to: next,
        });
        Ok(())
    }

    fn say(&self, session: &mut HostPatchSession, message: impl Into<String>) {
        let line = session.note(message);
        info!(host = %self.hostname, phase = %line.phase, "{}", line.message);
        let event = PatchEvent::Status {
            host: self.hostname.clone(),
            phase: line.phase,
            message: line.message.clone(),
        };
        self.emit(event);
    }

    fn emit(&self, event: PatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn probe(&self) -> Result<(), CoreError> {
        let result = self
            .executor
            .run_with_timeout("echo ok", self.timing.probe_timeout)
            .await
            .map_err(|e| CoreError::Connectivity(e.to_string()))?;

        if result.success() && result.trimmed() == "ok" {
            Ok(())
        } else {
            Err(CoreError::Connectivity(format!(
                "probe returned status {}",
                result.status
            )))
        }
    }

    /// Reachability and kernel are required; the rest is observation only
    async fn precheck(&self, session: &mut HostPatchSession, full: bool) -> Result<(), CoreError> {
        self.probe().await?;
        self.say(session, "host is reachable");

        let kernel = self
            .facts
            .installed_kernel()
            .await
            .map_err(|e| CoreError::Facts(format!("installed kernel: {e}")))?;
        self.say(session, format!("installed kernel {kernel}"));
        session.pre_kernel = Some(kernel);

        let mut report = PrecheckReport {
            reachable: true,
            facts: None,
            installed_packages: None,
            available_updates: None,
        };

        if full {
            let facts = self.facts.snapshot().await;
            if let Some(running) = &facts.running_kernel {
                self.say(session, format!("running kernel {running}"));
            }
            if let Some(root) = root_filesystem(&facts.disks) {
                self.say(
                    session,
                    format!(
                        "disk {}: {}% used, {} MB available",
                        root.mount_point,
                        root.used_percent,
                        root.available_kb / 1024
                    ),
                );
            }
            if let Some(mem) = facts.memory {
                self.say(
                    session,
                    format!(
                        "memory: {} MB available of {} MB",
                        mem.available_mb(),
                        mem.total_mb()
                    ),
                );
            }
            report.facts = Some(facts);

            match self.packages.list_installed().await {
                Ok(installed) => {
                    self.say(session, format!("{} packages installed", installed.len()));
                    report.installed_packages = Some(installed.len());
                }
                Err(e) => warn!(host = %self.hostname, error = %e, "package snapshot failed"),
            }

            match self.packages.list_upgradable(&self.config.repos()).await {
                Ok(available) => {
                    self.say(session, format!("{} updates available", available.len()));
                    report.available_updates = Some(available.into_iter().map(|p| p.name).collect());
                }
                Err(e) => warn!(host = %self.hostname, error = %e, "listing updates failed"),
            }
        }

        session.precheck = Some(report);
        Ok(())
    }

    async fn update(&self, session: &mut HostPatchSession) -> Result<(), CoreError> {
        if !self.config.perform_update {
            let outcome = UpdateOutcome::skipped();
            self.say(session, outcome.message.clone());
            session.update = Some(outcome);
            return Ok(());
        }

        if self.config.clear_cache {
            self.packages
                .clean_cache()
                .await
                .map_err(|e| CoreError::Update(format!("clean cache: {e}")))?;
            self.say(session, "package cache cleared");
        }

        let result = self
            .packages
            .upgrade_all(&self.config.repos())
            .await
            .map_err(|e| CoreError::Update(e.to_string()))?;

        let outcome = UpdateOutcome::from(result);
        self.say(session, outcome.message.clone());
        session.update = Some(outcome);
        Ok(())
    }

    /// Re-read the installed kernel even when the update was skipped
    async fn decide_reboot(&self, session: &mut HostPatchSession) -> Result<(), CoreError> {
        let post = self.facts.installed_kernel().await.map_err(|e| {
            CoreError::Update(format!("could not read installed kernel after update: {e}"))
        })?;
        let pre = session
            .pre_kernel
            .clone()
            .ok_or_else(|| CoreError::Facts("pre-update kernel was never captured".into()))?;

        let decision = RebootDecision::evaluate(&pre, &post, self.config.default_reboot_required);
        session.post_kernel = Some(post.clone());
        session.record_decision(decision.clone())?;

        if decision.kernel_changed {
            self.say(session, format!("kernel changed: {pre} -> {post}"));
            session.queue_reboot(RebootReason::KernelChanged { from: pre, to: post });
        } else if decision.explicitly_required {
            self.say(session, "kernel unchanged, reboot required by configuration");
            session.queue_reboot(RebootReason::Configured);
        } else {
            self.say(session, "kernel unchanged, no reboot required");
        }
        Ok(())
    }

    async fn advisory_check(&self, session: &mut HostPatchSession) {
        let verdict = match self.packages.reboot_required().await {
            Ok(RebootAdvice::Needed) => AdvisoryVerdict::Needed,
            Ok(RebootAdvice::NotNeeded) => AdvisoryVerdict::NotNeeded,
            Ok(RebootAdvice::Inconclusive { status, output }) => {
                let err = CoreError::AdvisoryCheck(format!("exit status {status}: {output}"));
                warn!(host = %self.hostname, error = %err, "ignoring advisory check");
                AdvisoryVerdict::Ignored {
                    reason: err.to_string(),
                }
            }
            Err(e) => {
                let err = CoreError::AdvisoryCheck(e.to_string());
                warn!(host = %self.hostname, error = %err, "ignoring advisory check");
                AdvisoryVerdict::Ignored {
                    reason: err.to_string(),
                }
            }
        };

        match &verdict {
            AdvisoryVerdict::Needed if session.has_rebooted() => {
                self.say(session, "advisory check wants a reboot; already rebooted this session");
            }
            AdvisoryVerdict::Needed => {
                self.say(session, "advisory check reports a reboot is needed");
                session.queue_reboot(RebootReason::Advisory);
            }
            AdvisoryVerdict::NotNeeded => self.say(session, "advisory check: no reboot needed"),
            AdvisoryVerdict::Ignored { reason } => {
                let message = format!("advisory check ignored ({reason})");
                self.say(session, message);
            }
        }
        session.advisory = Some(verdict);
    }

    /// Run queued post-actions; a second reboot is skipped, never executed
    async fn run_post_actions(&self, session: &mut HostPatchSession) -> Result<(), CoreError> {
        while let Some(action) = session.next_action() {
            match action {
                PostAction::Reboot(reason) => {
                    if session.has_rebooted() {
                        self.say(session, format!("skipping reboot ({reason}): already rebooted"));
                        continue;
                    }
                    self.reboot(session, reason).await?;
                }
            }
        }
        Ok(())
    }

    async fn reboot(
        &self,
        session: &mut HostPatchSession,
        reason: RebootReason,
    ) -> Result<(), CoreError> {
        if session.has_rebooted() {
            return Err(CoreError::AlreadyRebooted(self.hostname.clone()));
        }

        self.advance(session, SessionPhase::Reboot)?;
        self.say(session, format!("rebooting: {reason}"));

        let boot_id = match self.facts.boot_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(host = %self.hostname, error = %e, "could not read boot id; first answer after reboot counts");
                None
            }
        };

        let command = if self.use_sudo {
            format!("sudo -n {}", self.config.reboot_command)
        } else {
            self.config.reboot_command.clone()
        };

        // The connection usually drops while shutdown runs; only an explicit
        // non-zero exit means the host refused
        match self
            .executor
            .run_with_timeout(&command, self.timing.probe_timeout)
            .await
        {
            Ok(result) if result.status > 0 => {
                return Err(CoreError::Reboot(format!(
                    "exit {}: {}",
                    result.status,
                    result.combined_output().trim()
                )));
            }
            Ok(_) => {}
            Err(e) => info!(host = %self.hostname, error = %e, "connection dropped during reboot"),
        }

        self.advance(session, SessionPhase::WaitReachable)?;
        self.say(
            session,
            format!("waiting up to {:?} for host to come back", self.timing.timeout),
        );

        match wait_for_return(self.executor.as_ref(), boot_id.as_deref(), self.timing).await {
            Ok(elapsed) => {
                session.record_reboot(RebootOutcome {
                    reason,
                    reachable_after: true,
                    elapsed,
                })?;
                self.say(session, format!("host back after {}s", elapsed.as_secs()));
                Ok(())
            }
            Err(e) => {
                session.record_reboot(RebootOutcome {
                    reason,
                    reachable_after: false,
                    elapsed: self.timing.timeout,
                })?;
                Err(e)
            }
        }
    }

    /// Report-only: nothing in here fails the session
    async fn postcheck(&self, session: &mut HostPatchSession) {
        let reachable = match self.probe().await {
            Ok(()) => {
                self.say(session, "host is reachable");
                true
            }
            Err(e) => {
                self.say(session, format!("host is not reachable: {e}"));
                false
            }
        };

        let mut report = PostcheckReport {
            reachable,
            running_kernel: None,
            uptime: None,
            health: Vec::new(),
        };

        if reachable {
            match self.facts.running_kernel().await {
                Ok(kernel) => {
                    self.say(session, format!("running kernel {kernel}"));
                    if session.post_kernel.as_ref().is_some_and(|k| *k != kernel) {
                        self.say(session, "running kernel differs from newest installed kernel");
                    }
                    report.running_kernel = Some(kernel);
                }
                Err(e) => self.say(session, format!("could not read running kernel: {e}")),
            }

            match self.facts.uptime().await {
                Ok(uptime) => {
                    self.say(session, rhelpatch_inventory::types::format_uptime(uptime));
                    report.uptime = Some(uptime);
                }
                Err(e) => self.say(session, format!("could not read uptime: {e}")),
            }

            if self.health_checks.is_empty() {
                self.say(session, "no health checks configured");
            }
            for check in &self.health_checks {
                debug!(host = %self.hostname, check = check.name(), "running health check");
                let result = check.check(self.executor.as_ref()).await;
                let verdict = if result.passed { "passed" } else { "FAILED" };
                self.say(
                    session,
                    format!("health check {} {verdict}: {}", result.name, result.detail),
                );
                report.health.push(result);
            }
        }

        session.postcheck = Some(report);
    }
}

fn root_filesystem(disks: &[DiskUsage]) -> Option<&DiskUsage> {
    disks
        .iter()
        .find(|d| d.mount_point == "/")
        .or_else(|| disks.first())
}
