//! Configuration types for hosts and patch runs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rhelpatch_pkg::RepoSelection;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Longest reboot wait accepted from configuration
pub const MAX_REBOOT_TIMEOUT_MINUTES: u64 = 24 * 60;

/// Run-scoped patch settings, read-only for the whole session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Run the update phase at all
    #[serde(default = "default_true")]
    pub perform_update: bool,
    /// Reboot even when the kernel did not change
    #[serde(default)]
    pub default_reboot_required: bool,
    /// Bound on the wait for a host to come back after reboot
    #[serde(default = "default_reboot_timeout_minutes")]
    pub reboot_timeout_minutes: u64,
    /// Repositories passed as `--disablerepo`
    #[serde(default)]
    pub disable_repos: Vec<String>,
    /// Repositories passed as `--enablerepo`
    #[serde(default)]
    pub enable_repos: Vec<String>,
    /// Run `dnf clean all` before upgrading
    #[serde(default = "default_true")]
    pub clear_cache: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub reboot_poll_interval_secs: u64,
    /// Grace period before the first reachability probe after reboot
    #[serde(default = "default_post_reboot_delay_secs")]
    pub post_reboot_delay_secs: u64,
    /// Bound on a single probe or connection attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
}

fn default_true() -> bool {
    true
}

fn default_reboot_timeout_minutes() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_post_reboot_delay_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reboot_command() -> String {
    r#"shutdown -r now "rhelpatch: rebooting after patching""#.to_string()
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            perform_update: true,
            default_reboot_required: false,
            reboot_timeout_minutes: default_reboot_timeout_minutes(),
            disable_repos: Vec::new(),
            enable_repos: Vec::new(),
            clear_cache: true,
            reboot_poll_interval_secs: default_poll_interval_secs(),
            post_reboot_delay_secs: default_post_reboot_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reboot_command: default_reboot_command(),
        }
    }
}

impl PatchConfig {
    #[must_use]
    pub fn repos(&self) -> RepoSelection {
        RepoSelection::new(self.disable_repos.clone(), self.enable_repos.clone())
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject settings that would make a session misbehave
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` describing the first problem found
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.reboot_timeout_minutes == 0 {
            return Err(CoreError::ConfigError(
                "reboot_timeout_minutes must be greater than zero".into(),
            ));
        }
        if self.reboot_timeout_minutes > MAX_REBOOT_TIMEOUT_MINUTES {
            return Err(CoreError::ConfigError(format!(
                "reboot_timeout_minutes must be at most {MAX_REBOOT_TIMEOUT_MINUTES}"
            )));
        }
        if self.reboot_poll_interval_secs == 0 {
            return Err(CoreError::ConfigError(
                "reboot_poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(CoreError::ConfigError(
                "connect_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.reboot_command.trim().is_empty() {
            return Err(CoreError::ConfigError("reboot_command is empty".into()));
        }
        self.repos()
            .to_flags()
            .map_err(|e| CoreError::ConfigError(e.to_string()))?;
        Ok(())
    }
}

/// Timings used by the reboot wait, derived from `PatchConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootTiming {
    /// Overall bound from issuing the reboot to the host answering again
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub post_reboot_delay: Duration,
    /// Bound on each individual probe
    pub probe_timeout: Duration,
}

impl From<&PatchConfig> for RebootTiming {
    fn from(config: &PatchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.reboot_timeout_minutes.saturating_mul(60)),
            poll_interval: Duration::from_secs(config.reboot_poll_interval_secs),
            post_reboot_delay: Duration::from_secs(config.post_reboot_delay_secs),
            probe_timeout: config.connect_timeout(),
        }
    }
}

/// Configuration for a single managed host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique hostname identifier
    pub name: String,
    /// IP address or hostname for SSH connection; `localhost` runs commands locally
    pub addr: String,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to SSH private key
    pub ssh_key: Option<String>,
    /// Environment variable holding a base64 private key
    pub ssh_key_env: Option<String>,
    /// Group names usable with `--limit`
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

impl HostConfig {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            user: default_user(),
            port: default_port(),
            ssh_key: None,
            ssh_key_env: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.addr == "localhost" || self.addr == "127.0.0.1"
    }
}

/// Phase group selectors, the `pre_patch`/`patch`/`post_patch` tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTag {
    PrePatch,
    Patch,
    PostPatch,
}

impl FromStr for PhaseTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pre_patch" => Ok(PhaseTag::PrePatch),
            "patch" => Ok(PhaseTag::Patch),
            "post_patch" => Ok(PhaseTag::PostPatch),
            other => Err(CoreError::ConfigError(format!(
                "unknown tag {other:?} (expected pre_patch, patch or post_patch)"
            ))),
        }
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseTag::PrePatch => write!(f, "pre_patch"),
            PhaseTag::Patch => write!(f, "patch"),
            PhaseTag::PostPatch => write!(f, "post_patch"),
        }
    }
}

/// Which phase groups a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSelection {
    pub pre_patch: bool,
    pub patch: bool,
    pub post_patch: bool,
}

impl Default for PhaseSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl PhaseSelection {
    #[must_use]
    pub fn all() -> Self {
        Self {
            pre_patch: true,
            patch: true,
            post_patch: true,
        }
    }

    /// Only the given groups; an empty list selects everything
    #[must_use]
    pub fn from_tags(tags: &[PhaseTag]) -> Self {
        if tags.is_empty() {
            return Self::all();
        }
        Self {
            pre_patch: tags.contains(&PhaseTag::PrePatch),
            patch: tags.contains(&PhaseTag::Patch),
            post_patch: tags.contains(&PhaseTag::PostPatch),
        }
    }
}

/// Settings for a run across all registered hosts
#[derive(Debug, Clone)]
pub struct FleetRunConfig {
    /// Number of host sessions run concurrently
    pub batch_size: usize,
    pub phases: PhaseSelection,
    pub filter: Option<FleetFilter>,
}

impl Default for FleetRunConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            phases: PhaseSelection::all(),
            filter: None,
        }
    }
}

/// Host selection for a fleet run
#[derive(Debug, Clone, Default)]
pub struct FleetFilter {
    /// Host names or tags to include; empty includes everything
    pub limit: Vec<String>,
    /// Exclude these specific hosts
    pub exclude_hosts: Vec<String>,
}

impl FleetFilter {
    #[must_use]
    pub fn matches(&self, host: &HostConfig) -> bool {
        if self.exclude_hosts.contains(&host.name) {
            return false;
        }
        self.limit.is_empty()
            || self
                .limit
                .iter()
                .any(|l| *l == host.name || host.tags.contains(l))
    }
}
