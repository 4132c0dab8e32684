//! High-level fact collection API

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rhelpatch_exec::RemoteExecutor;
use tracing::{debug, instrument, warn};

use crate::error::InventoryError;
use crate::parse;
use crate::types::{DiskUsage, HostFacts, KernelVersion, MemoryInfo};

const INSTALLED_KERNEL_QUERY: &str = "rpm -q --last kernel-core kernel";
const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Fact collector
///
/// Wraps an executor with one method per fact. Every query runs under
/// `query_timeout` so a wedged host cannot stall a session.
pub struct FactCollector {
    executor: Arc<dyn RemoteExecutor>,
    query_timeout: Duration,
}

impl FactCollector {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            query_timeout: Duration::from_secs(60),
        }
    }

    async fn query(&self, cmd: &str) -> Result<String, InventoryError> {
        let result = self
            .executor
            .run_with_timeout(cmd, self.query_timeout)
            .await
            .map_err(|e| InventoryError::ExecutionError(e.to_string()))?;

        if !result.success() {
            let message = if result.stderr.trim().is_empty() {
                result.stdout.trim().to_string()
            } else {
                result.stderr.trim().to_string()
            };
            return Err(InventoryError::QueryFailed {
                status: result.status,
                message,
            });
        }
        Ok(result.stdout)
    }

    /// Kernel currently booted (`uname -r`)
    ///
    /// # Errors
    /// Returns an error if the command fails
    #[instrument(skip(self))]
    pub async fn running_kernel(&self) -> Result<KernelVersion, InventoryError> {
        let out = self.query("uname -r").await?;
        let version = KernelVersion::new(&out);
        if version.as_str().is_empty() {
            return Err(InventoryError::ParseError("empty uname -r output".into()));
        }
        Ok(version)
    }

    /// Most recently installed kernel package
    ///
    /// This is what changes when dnf installs a new kernel; the running
    /// kernel only changes after a reboot.
    ///
    /// # Errors
    /// Returns an error if rpm fails or lists no kernel
    #[instrument(skip(self))]
    pub async fn installed_kernel(&self) -> Result<KernelVersion, InventoryError> {
        // rpm exits non-zero when one of the two names is not installed, so
        // read the output regardless of status
        let result = self
            .executor
            .run_with_timeout(INSTALLED_KERNEL_QUERY, self.query_timeout)
            .await
            .map_err(|e| InventoryError::ExecutionError(e.to_string()))?;

        parse::newest_installed_kernel(&result.stdout).ok_or_else(|| {
            InventoryError::ParseError(format!(
                "no installed kernel in rpm output (status {})",
                result.status
            ))
        })
    }

    /// Random id the kernel generates on every boot
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub async fn boot_id(&self) -> Result<String, InventoryError> {
        let out = self.query(&format!("cat {BOOT_ID_PATH}")).await?;
        Ok(out.trim().to_string())
    }

    /// # Errors
    /// Returns an error if df fails
    #[instrument(skip(self))]
    pub async fn disk_usage(&self) -> Result<Vec<DiskUsage>, InventoryError> {
        let out = self.query("df -P -k -x tmpfs -x devtmpfs").await?;
        Ok(parse::disk_usage(&out))
    }

    /// # Errors
    /// Returns an error if `/proc/meminfo` cannot be read or parsed
    #[instrument(skip(self))]
    pub async fn memory(&self) -> Result<MemoryInfo, InventoryError> {
        let out = self.query("cat /proc/meminfo").await?;
        parse::meminfo(&out)
    }

    /// # Errors
    /// Returns an error if `/proc/uptime` cannot be read or parsed
    #[instrument(skip(self))]
    pub async fn uptime(&self) -> Result<Duration, InventoryError> {
        let out = self.query("cat /proc/uptime").await?;
        parse::uptime(&out)
    }

    /// Collect kernel, disk, memory and uptime, tolerating individual failures
    ///
    /// Failed queries are logged and leave their field empty.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> HostFacts {
        let mut facts = HostFacts::default();

        match self.running_kernel().await {
            Ok(kernel) => facts.running_kernel = Some(kernel),
            Err(e) => warn!(error = %e, "failed to read running kernel"),
        }

        match self.disk_usage().await {
            Ok(disks) => facts.disks = disks,
            Err(e) => warn!(error = %e, "failed to collect disk usage"),
        }

        match self.memory().await {
            Ok(mem) => facts.memory = Some(mem),
            Err(e) => warn!(error = %e, "failed to collect memory info"),
        }

        match self.uptime().await {
            Ok(up) => facts.uptime = Some(up),
            Err(e) => warn!(error = %e, "failed to collect uptime"),
        }

        facts.collected_at = Utc::now();
        debug!(disks = facts.disks.len(), "fact snapshot collected");

        facts
    }
}
