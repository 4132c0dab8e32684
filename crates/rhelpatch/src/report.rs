//! Human-readable output: streamed status lines and the final recap

use std::fmt::Write as _;

use rhelpatch_core::{FleetReport, HostOutcome, HostPatchSession, PatchEvent, UpdateStatus};
use rhelpatch_inventory::types::format_uptime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// One line per event, `None` for events not shown to the operator
#[must_use]
pub fn event_line(event: &PatchEvent) -> Option<String> {
    match event {
        PatchEvent::Status {
            host,
            phase,
            message,
        } => Some(format!("[{host}] {phase}: {message}")),
        PatchEvent::PhaseChanged { host, to, .. } if to.is_failure() => {
            Some(format!("[{host}] entered {to}"))
        }
        PatchEvent::SessionFinished { host, outcome } => Some(format!("[{host}] finished: {outcome}")),
        PatchEvent::PhaseChanged { .. }
        | PatchEvent::SessionStarted { .. }
        | PatchEvent::HostRegistered { .. }
        | PatchEvent::HostRemoved { .. } => None,
    }
}

pub fn print_event(event: &PatchEvent) {
    match event_line(event) {
        Some(line) => println!("{line}"),
        None => debug!(host = event.host(), ?event, "event"),
    }
}

/// Hand events to `on_event` until `run` finishes, then drain what is buffered
///
/// A closed channel stops the event branch; the run is still awaited.
pub async fn follow_events<T>(
    mut run: JoinHandle<T>,
    events: &mut broadcast::Receiver<PatchEvent>,
    mut on_event: impl FnMut(&PatchEvent),
) -> Result<T, JoinError> {
    let mut open = true;
    let outcome = loop {
        tokio::select! {
            joined = &mut run => break joined,
            event = events.recv(), if open => match event {
                Ok(event) => on_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status output fell behind"),
                Err(RecvError::Closed) => open = false,
            },
        }
    };
    while let Ok(event) = events.try_recv() {
        on_event(&event);
    }
    outcome
}

struct Row {
    host: String,
    result: String,
    phase: String,
    kernel: String,
    update: String,
    rebooted: String,
    detail: String,
}

fn row(session: &HostPatchSession) -> Row {
    let kernel = match (&session.pre_kernel, &session.post_kernel) {
        (Some(pre), Some(post)) if pre != post => format!("{pre} -> {post}"),
        (Some(pre), _) => pre.to_string(),
        (None, _) => "-".to_string(),
    };
    let update = match &session.update {
        Some(u) => match u.status {
            UpdateStatus::Skipped => "skipped".to_string(),
            UpdateStatus::Unchanged => "unchanged".to_string(),
            UpdateStatus::Changed => format!("{} pkgs", u.packages.len()),
        },
        None => "-".to_string(),
    };
    let rebooted = match session.reboot() {
        Some(r) if r.reachable_after => "yes".to_string(),
        Some(_) => "no answer".to_string(),
        None => "no".to_string(),
    };
    let detail = match session.outcome() {
        HostOutcome::Failed { error, .. } => error,
        HostOutcome::Success => session
            .postcheck
            .as_ref()
            .map(|p| {
                let failed = p.health.iter().filter(|h| !h.passed).count();
                let uptime = p.uptime.map(format_uptime).unwrap_or_default();
                if failed > 0 {
                    format!("{failed} health check(s) failed; {uptime}")
                } else {
                    uptime
                }
            })
            .unwrap_or_default(),
    };

    Row {
        host: session.hostname.clone(),
        result: if session.outcome().is_success() {
            "ok".to_string()
        } else {
            "FAILED".to_string()
        },
        phase: session.phase().to_string(),
        kernel,
        update,
        rebooted,
        detail,
    }
}

/// Recap table, one row per host
#[must_use]
pub fn render_summary(report: &FleetReport) -> String {
    let headers = ["HOST", "RESULT", "PHASE", "KERNEL", "UPDATE", "REBOOTED", "DETAIL"];
    let rows: Vec<[String; 7]> = report
        .sessions
        .iter()
        .map(row)
        .map(|r| [r.host, r.result, r.phase, r.kernel, r.update, r.rebooted, r.detail])
        .collect();

    let mut widths = headers.map(str::len);
    for r in &rows {
        for (w, cell) in widths.iter_mut().zip(r.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_line = |cells: Vec<&str>| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    };

    push_line(headers.to_vec());
    for r in &rows {
        push_line(r.iter().map(String::as_str).collect());
    }

    let _ = write!(
        out,
        "\n{} host(s): {} ok, {} failed",
        report.total(),
        report.succeeded,
        report.failed
    );
    out
}

pub fn print_summary(report: &FleetReport) {
    println!();
    println!("{}", render_summary(report));
}
