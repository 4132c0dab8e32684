//! Parsers for the command output the collector reads

use std::time::Duration;

use crate::error::InventoryError;
use crate::types::{DiskUsage, KernelVersion, MemoryInfo};

/// Newest installed kernel from `rpm -q --last kernel-core kernel`
///
/// rpm prints one `<nevra>  <install date>` row per package, newest first.
/// Rows for packages that are not installed start with "package " and are skipped.
pub fn newest_installed_kernel(output: &str) -> Option<KernelVersion> {
    output.lines().find_map(|line| {
        let nevra = line.split_whitespace().next()?;
        let version = nevra
            .strip_prefix("kernel-core-")
            .or_else(|| nevra.strip_prefix("kernel-"))?;
        // kernel-headers, kernel-tools, ... are not kernels
        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        Some(KernelVersion::new(version))
    })
}

/// `df -P -k` rows, header skipped
pub fn disk_usage(output: &str) -> Vec<DiskUsage> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            Some(DiskUsage {
                filesystem: parts[0].to_string(),
                total_kb: parts[1].parse().ok()?,
                used_kb: parts[2].parse().ok()?,
                available_kb: parts[3].parse().ok()?,
                used_percent: parts[4].trim_end_matches('%').parse().ok()?,
                // mount points may contain spaces
                mount_point: parts[5..].join(" "),
            })
        })
        .collect()
}

/// `/proc/meminfo`
///
/// # Errors
/// Returns `InventoryError::ParseError` if `MemTotal` is missing
pub fn meminfo(output: &str) -> Result<MemoryInfo, InventoryError> {
    let field = |key: &str| -> Option<u64> {
        output.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse().ok()
        })
    };

    let total_kb =
        field("MemTotal").ok_or_else(|| InventoryError::ParseError("MemTotal missing".into()))?;
    // kernels before 3.14 have no MemAvailable
    let available_kb = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .unwrap_or(0);

    Ok(MemoryInfo {
        total_kb,
        available_kb,
        swap_total_kb: field("SwapTotal").unwrap_or(0),
        swap_free_kb: field("SwapFree").unwrap_or(0),
    })
}

/// First field of `/proc/uptime`, in seconds with a fractional part
///
/// # Errors
/// Returns `InventoryError::ParseError` on malformed input
pub fn uptime(output: &str) -> Result<Duration, InventoryError> {
    output
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| InventoryError::ParseError(format!("bad /proc/uptime: {output:?}")))
}
