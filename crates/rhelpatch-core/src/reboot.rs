//! Reboot decision and the bounded wait for a host to come back

use std::time::Duration;

use rhelpatch_exec::RemoteExecutor;
use rhelpatch_inventory::KernelVersion;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::config::RebootTiming;
use crate::error::CoreError;

pub(crate) const BOOT_ID_CMD: &str = "cat /proc/sys/kernel/random/boot_id";

/// Whether the session must reboot the host, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootDecision {
    /// Newest installed kernel differs from the one seen in pre-check
    pub kernel_changed: bool,
    /// `default_reboot_required` was set
    pub explicitly_required: bool,
}

impl RebootDecision {
    #[must_use]
    pub fn evaluate(pre: &KernelVersion, post: &KernelVersion, explicitly_required: bool) -> Self {
        Self {
            kernel_changed: pre != post,
            explicitly_required,
        }
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.kernel_changed || self.explicitly_required
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RebootReason {
    KernelChanged {
        from: KernelVersion,
        to: KernelVersion,
    },
    Configured,
    Advisory,
}

impl std::fmt::Display for RebootReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebootReason::KernelChanged { from, to } => {
                write!(f, "kernel changed from {from} to {to}")
            }
            RebootReason::Configured => write!(f, "default_reboot_required is set"),
            RebootReason::Advisory => write!(f, "needs-restarting reported a reboot is needed"),
        }
    }
}

/// Work queued by a phase to run before the session moves on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostAction {
    Reboot(RebootReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootOutcome {
    pub reason: RebootReason,
    pub reachable_after: bool,
    pub elapsed: Duration,
}

/// What the advisory reboot check concluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AdvisoryVerdict {
    NotNeeded,
    Needed,
    /// Check failed or exited with an unexpected status; treated as not needed
    Ignored { reason: String },
}

/// Poll until the host answers with a boot id different from `previous_boot_id`
///
/// The transport is reset before every probe since the pre-reboot connection
/// is dead. When the old boot id is unknown the first successful probe counts.
/// Returns the time from the call until the host answered.
///
/// # Errors
/// Returns `CoreError::RebootTimeout` once `timing.timeout` has elapsed
pub async fn wait_for_return(
    executor: &dyn RemoteExecutor,
    previous_boot_id: Option<&str>,
    timing: RebootTiming,
) -> Result<Duration, CoreError> {
    let start = Instant::now();

    let poll = async {
        sleep(timing.post_reboot_delay).await;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Err(e) = executor.reset().await {
                debug!(error = %e, "transport reset failed");
            }

            match timeout(timing.probe_timeout, executor.run(BOOT_ID_CMD)).await {
                Ok(Ok(result)) if result.success() => {
                    let boot_id = result.trimmed();
                    if previous_boot_id.is_some_and(|prev| prev == boot_id) {
                        debug!(attempt, "host still on the previous boot");
                    } else {
                        return start.elapsed();
                    }
                }
                Ok(Ok(result)) => debug!(attempt, status = result.status, "probe failed"),
                Ok(Err(e)) => debug!(attempt, error = %e, "host not reachable yet"),
                Err(_) => debug!(attempt, "probe timed out"),
            }

            sleep(timing.poll_interval).await;
        }
    };

    match timeout(timing.timeout, poll).await {
        Ok(elapsed) => Ok(elapsed),
        Err(_) => {
            warn!(timeout = ?timing.timeout, "host did not come back after reboot");
            Err(CoreError::RebootTimeout {
                timeout: timing.timeout,
            })
        }
    }
}
