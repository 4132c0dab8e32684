//! Fact type definitions

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A kernel version string such as `4.18.0-513.el8.x86_64`
///
/// Always stored trimmed; equality is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelVersion(String);

impl KernelVersion {
    pub fn new(version: impl AsRef<str>) -> Self {
        Self(version.as_ref().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KernelVersion {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One mounted filesystem from `df -P`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub filesystem: String,
    pub mount_point: String,
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
    /// Capacity column, 0-100
    pub used_percent: u8,
}

/// Memory totals from `/proc/meminfo`, in kB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

impl MemoryInfo {
    #[must_use]
    pub fn available_mb(&self) -> u64 {
        self.available_kb / 1024
    }

    #[must_use]
    pub fn total_mb(&self) -> u64 {
        self.total_kb / 1024
    }
}

/// Best-effort snapshot; a field is `None`/empty when its query failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostFacts {
    pub running_kernel: Option<KernelVersion>,
    pub disks: Vec<DiskUsage>,
    pub memory: Option<MemoryInfo>,
    pub uptime: Option<Duration>,
    pub collected_at: DateTime<Utc>,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self {
            running_kernel: None,
            disks: Vec::new(),
            memory: None,
            uptime: None,
            collected_at: Utc::now(),
        }
    }
}

/// Render an uptime the way `uptime -p` does, e.g. `up 3 days, 4 hours, 5 minutes`
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let total_minutes = uptime.as_secs() / 60;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    let mut push = |n: u64, unit: &str| {
        if n > 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{n} {unit}{plural}"));
        }
    };
    push(days, "day");
    push(hours, "hour");
    push(minutes, "minute");

    if parts.is_empty() {
        "up less than a minute".to_string()
    } else {
        format!("up {}", parts.join(", "))
    }
}
