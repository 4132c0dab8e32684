mod common;

use std::sync::Arc;

use common::{FakeHost, NEW_KERNEL, OLD_KERNEL, runner};
use rhelpatch_core::{
    AdvisoryVerdict, CommandHealthCheck, HealthCheck, HostOutcome, PatchConfig, PatchEvent,
    PhaseSelection, PhaseTag, RebootReason, SessionPhase, UpdateStatus,
};
use rhelpatch_inventory::KernelVersion;

fn phase_changes(rx: &mut tokio::sync::broadcast::Receiver<PatchEvent>) -> Vec<SessionPhase> {
    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PatchEvent::PhaseChanged { to, .. } = event {
            phases.push(to);
        }
    }
    phases
}

#[tokio::test]
async fn test_kernel_update_reboots_and_reports_new_kernel() {
    let host = Arc::new(FakeHost::new().with_pending_kernel(NEW_KERNEL));
    let (runner, mut rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.outcome(), HostOutcome::Success);
    assert_eq!(session.pre_kernel, Some(KernelVersion::new(OLD_KERNEL)));
    assert_eq!(session.post_kernel, Some(KernelVersion::new(NEW_KERNEL)));
    assert_eq!(host.reboots(), 1);

    let reboot = session.reboot().unwrap();
    assert!(reboot.reachable_after);
    assert!(matches!(reboot.reason, RebootReason::KernelChanged { .. }));
    assert_eq!(session.advisory, Some(AdvisoryVerdict::NotNeeded));

    let postcheck = session.postcheck.as_ref().unwrap();
    assert!(postcheck.reachable);
    assert_eq!(postcheck.running_kernel, Some(KernelVersion::new(NEW_KERNEL)));

    assert_eq!(
        phase_changes(&mut rx),
        vec![
            SessionPhase::Precheck,
            SessionPhase::Update,
            SessionPhase::DecideReboot,
            SessionPhase::Reboot,
            SessionPhase::WaitReachable,
            SessionPhase::AdvisoryRebootCheck,
            SessionPhase::Postcheck,
            SessionPhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_perform_update_false_touches_nothing() {
    let host = Arc::new(FakeHost::new().with_pending_kernel(NEW_KERNEL));
    let config = PatchConfig {
        perform_update: false,
        ..PatchConfig::default()
    };
    let (runner, _rx) = runner(&host, config);

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.update.as_ref().unwrap().status, UpdateStatus::Skipped);
    assert!(!session.has_rebooted());
    assert!(!host.ran("-y upgrade"));
    assert!(!host.ran("clean all"));
    assert!(!host.ran("shutdown"));
    assert_eq!(host.installed_kernel(), OLD_KERNEL);
}

#[tokio::test]
async fn test_configured_reboot_without_kernel_change() {
    let host = Arc::new(FakeHost::new());
    let config = PatchConfig {
        perform_update: false,
        default_reboot_required: true,
        ..PatchConfig::default()
    };
    let (runner, _rx) = runner(&host, config);

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    let decision = session.reboot_decision().unwrap();
    assert!(!decision.kernel_changed);
    assert!(decision.explicitly_required);
    assert_eq!(session.reboot().unwrap().reason, RebootReason::Configured);
    assert_eq!(host.reboots(), 1);
}

#[tokio::test]
async fn test_userspace_update_does_not_reboot() {
    let host = Arc::new(FakeHost::new().with_pending_package("openssl", "1:1.1.1k-12.el8_9"));
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    let update = session.update.as_ref().unwrap();
    assert_eq!(update.status, UpdateStatus::Changed);
    assert_eq!(update.packages, vec!["openssl"]);
    assert!(!session.reboot_decision().unwrap().required());
    assert!(!session.has_rebooted());
    assert_eq!(host.reboots(), 0);
}

#[tokio::test]
async fn test_advisory_check_triggers_reboot() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_package("glibc", "2.28-236.el8")
            .advisory_exit(1),
    );
    let (runner, mut rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.advisory, Some(AdvisoryVerdict::Needed));
    assert_eq!(session.reboot().unwrap().reason, RebootReason::Advisory);
    assert_eq!(host.reboots(), 1);

    let phases = phase_changes(&mut rx);
    assert_eq!(
        &phases[2..],
        &[
            SessionPhase::DecideReboot,
            SessionPhase::AdvisoryRebootCheck,
            SessionPhase::Reboot,
            SessionPhase::WaitReachable,
            SessionPhase::Postcheck,
            SessionPhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_reboots_at_most_once_per_session() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_kernel(NEW_KERNEL)
            .advisory_exit(1),
    );
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.advisory, Some(AdvisoryVerdict::Needed));
    assert_eq!(host.reboots(), 1);
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.message.contains("already rebooted"))
    );
}

#[tokio::test]
async fn test_inconclusive_advisory_check_is_ignored() {
    let host = Arc::new(FakeHost::new().advisory_exit(2));
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert!(matches!(
        session.advisory,
        Some(AdvisoryVerdict::Ignored { .. })
    ));
    assert!(!session.has_rebooted());
}

#[tokio::test]
async fn test_advisory_command_error_is_ignored() {
    let host = Arc::new(FakeHost::new().advisory_errors());
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.outcome(), HostOutcome::Success);
    let Some(AdvisoryVerdict::Ignored { reason }) = &session.advisory else {
        panic!("expected an ignored advisory verdict, got {:?}", session.advisory);
    };
    assert!(reason.contains("channel closed before exec"));
    assert!(!session.has_rebooted());
    assert!(session.postcheck.as_ref().unwrap().reachable);
}

#[tokio::test]
async fn test_unreachable_at_postcheck_is_reported_not_fatal() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_package("openssl", "1:1.1.1k-12.el8_9")
            .lost_after_advisory(),
    );
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.outcome(), HostOutcome::Success);
    let postcheck = session.postcheck.as_ref().unwrap();
    assert!(!postcheck.reachable);
    assert!(postcheck.running_kernel.is_none());
    assert!(postcheck.health.is_empty());
    assert!(
        session
            .messages
            .iter()
            .any(|m| m.message.starts_with("host is not reachable"))
    );
}

#[tokio::test]
async fn test_reboot_timeout_skips_postcheck() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_kernel(NEW_KERNEL)
            .never_returns(),
    );
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::RebootTimeout);
    assert!(session.postcheck.is_none());
    assert!(session.advisory.is_none());
    assert!(!session.reboot().unwrap().reachable_after);
    assert!(matches!(
        session.outcome(),
        HostOutcome::Failed {
            phase: SessionPhase::RebootTimeout,
            ..
        }
    ));
    // one transport reset per probe
    assert!(host.resets() > 1);
}

#[tokio::test]
async fn test_rejected_reboot_command_fails_session() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_kernel(NEW_KERNEL)
            .rejects_reboot(1),
    );
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::RebootTimeout);
    assert!(session.error.as_deref().unwrap().contains("reboot command failed"));
    assert!(!session.has_rebooted());
    assert!(session.postcheck.is_none());
}

#[tokio::test]
async fn test_unreachable_host_fails_precheck() {
    let host = Arc::new(FakeHost::new().unreachable());
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::PrecheckFailed);
    assert!(session.update.is_none());
    assert!(!host.ran("check-update"));
    assert!(session.error.as_deref().unwrap().contains("unreachable"));
}

#[tokio::test]
async fn test_update_failure_stops_session() {
    let host = Arc::new(
        FakeHost::new()
            .with_pending_kernel(NEW_KERNEL)
            .upgrade_fails(),
    );
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::UpdateFailed);
    assert!(session.reboot_decision().is_none());
    assert!(session.postcheck.is_none());
    assert_eq!(host.reboots(), 0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let host = Arc::new(FakeHost::new().with_pending_kernel(NEW_KERNEL));
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let first = runner.run(PhaseSelection::all()).await;
    assert!(first.has_rebooted());

    let second = runner.run(PhaseSelection::all()).await;
    assert_eq!(second.phase(), SessionPhase::Done);
    assert_eq!(second.update.as_ref().unwrap().status, UpdateStatus::Unchanged);
    assert!(!second.has_rebooted());
    assert_eq!(second.pre_kernel, second.post_kernel);
    assert_eq!(host.reboots(), 1);
}

#[tokio::test]
async fn test_post_patch_only_skips_update() {
    let host = Arc::new(FakeHost::new().with_pending_kernel(NEW_KERNEL));
    let (runner, mut rx) = runner(&host, PatchConfig::default());

    let session = runner
        .run(PhaseSelection::from_tags(&[PhaseTag::PostPatch]))
        .await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert!(session.precheck.is_none());
    assert!(session.update.is_none());
    assert!(session.postcheck.is_some());
    assert!(!host.ran("check-update"));
    assert_eq!(
        phase_changes(&mut rx),
        vec![SessionPhase::Postcheck, SessionPhase::Done]
    );
}

#[tokio::test]
async fn test_patch_only_still_captures_kernel() {
    let host = Arc::new(FakeHost::new().with_pending_kernel(NEW_KERNEL));
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner.run(PhaseSelection::from_tags(&[PhaseTag::Patch])).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(session.pre_kernel, Some(KernelVersion::new(OLD_KERNEL)));
    let precheck = session.precheck.as_ref().unwrap();
    assert!(precheck.facts.is_none());
    assert!(session.postcheck.is_none());
    assert_eq!(host.reboots(), 1);
}

#[tokio::test]
async fn test_precheck_collects_facts() {
    let host = Arc::new(FakeHost::new().with_pending_package("openssl", "1:1.1.1k-12.el8_9"));
    let (runner, _rx) = runner(&host, PatchConfig::default());

    let session = runner
        .run(PhaseSelection::from_tags(&[PhaseTag::PrePatch]))
        .await;

    assert_eq!(session.phase(), SessionPhase::Done);
    let precheck = session.precheck.as_ref().unwrap();
    let facts = precheck.facts.as_ref().unwrap();
    assert_eq!(facts.running_kernel, Some(KernelVersion::new(OLD_KERNEL)));
    assert_eq!(facts.disks.len(), 1);
    assert_eq!(precheck.installed_packages, Some(3));
    assert_eq!(
        precheck.available_updates.as_deref(),
        Some(&["openssl".to_string()][..])
    );
    assert!(session.update.is_none());
}

#[tokio::test]
async fn test_failing_health_check_is_reported_not_fatal() {
    let host = Arc::new(FakeHost::new());
    let (runner, _rx) = runner(&host, PatchConfig::default());
    let checks: Vec<Arc<dyn HealthCheck>> = vec![
        Arc::new(CommandHealthCheck::new("shell", "echo ok")),
        Arc::new(CommandHealthCheck::new("nginx", "systemctl is-active nginx")),
    ];
    let runner = runner.with_health_checks(checks);

    let session = runner.run(PhaseSelection::all()).await;

    assert_eq!(session.phase(), SessionPhase::Done);
    let health = &session.postcheck.as_ref().unwrap().health;
    assert_eq!(health.len(), 2);
    assert!(health[0].passed);
    assert!(!health[1].passed);
}

#[tokio::test]
async fn test_session_finished_event_carries_outcome() {
    let host = Arc::new(FakeHost::new().unreachable());
    let (runner, mut rx) = runner(&host, PatchConfig::default());

    runner.run(PhaseSelection::all()).await;

    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        if let PatchEvent::SessionFinished { outcome, .. } = event {
            finished = Some(outcome);
        }
    }
    assert!(matches!(
        finished,
        Some(HostOutcome::Failed {
            phase: SessionPhase::PrecheckFailed,
            ..
        })
    ));
}
