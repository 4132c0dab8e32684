//! Type definitions for package management

use serde::{Deserialize, Serialize};

use crate::error::PackageError;

/// A package with available updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradablePackage {
    /// Package name
    pub name: String,
    /// Available upgrade version
    pub new_version: String,
    /// Package architecture
    pub arch: Option<String>,
    /// Repository offering the update
    pub repository: Option<String>,
}

impl UpgradablePackage {
    pub fn new(name: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_version: new.into(),
            arch: None,
            repository: None,
        }
    }

    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    #[must_use]
    pub fn with_repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }
}

/// An installed package as reported by rpm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    /// `[epoch:]version-release`
    pub version: String,
    pub arch: String,
}

/// Result of an upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Whether anything on the host changed
    pub changed: bool,
    /// Human readable summary
    pub message: String,
    /// Names of packages that were pending before the upgrade ran
    pub upgraded_packages: Vec<String>,
}

impl UpdateResult {
    /// Nothing was installed
    pub fn unchanged(message: impl Into<String>) -> Self {
        Self {
            changed: false,
            message: message.into(),
            upgraded_packages: Vec::new(),
        }
    }

    /// Packages were upgraded
    #[must_use]
    pub fn upgraded(packages: Vec<String>) -> Self {
        Self {
            changed: true,
            message: format!("upgraded {} packages", packages.len()),
            upgraded_packages: packages,
        }
    }

    #[must_use]
    pub fn upgraded_count(&self) -> usize {
        self.upgraded_packages.len()
    }
}

/// Repositories to disable and enable for a single dnf invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSelection {
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default)]
    pub enable: Vec<String>,
}

impl RepoSelection {
    pub fn new(disable: Vec<String>, enable: Vec<String>) -> Self {
        Self { disable, enable }
    }

    /// Render as dnf command-line flags, disables first
    ///
    /// Repo ids end up in a shell command line, so anything outside the
    /// characters dnf allows in ids (plus `*` and `?` globs) is rejected.
    ///
    /// # Errors
    /// Returns `PackageError::ConfigError` for an invalid repo id
    pub fn to_flags(&self) -> Result<String, PackageError> {
        let mut flags = Vec::with_capacity(self.disable.len() + self.enable.len());
        for repo in &self.disable {
            validate_repo_id(repo)?;
            flags.push(format!("--disablerepo={repo}"));
        }
        for repo in &self.enable {
            validate_repo_id(repo)?;
            flags.push(format!("--enablerepo={repo}"));
        }
        Ok(flags.join(" "))
    }
}

fn validate_repo_id(repo: &str) -> Result<(), PackageError> {
    let valid = !repo.is_empty()
        && repo
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '*' | '?'));
    if valid {
        Ok(())
    } else {
        Err(PackageError::ConfigError(format!("invalid repository id: {repo:?}")))
    }
}

/// Verdict of the host's own reboot advisory (`needs-restarting -r`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum RebootAdvice {
    /// Exit status 0
    NotNeeded,
    /// Exit status 1
    Needed,
    /// Any other exit status; callers treat this as "no reboot"
    Inconclusive { status: i32, output: String },
}

impl RebootAdvice {
    #[must_use]
    pub fn from_exit_status(status: i32, output: &str) -> Self {
        match status {
            0 => RebootAdvice::NotNeeded,
            1 => RebootAdvice::Needed,
            _ => RebootAdvice::Inconclusive {
                status,
                output: output.trim().to_string(),
            },
        }
    }
}

/// Package manager type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerType {
    /// DNF (RHEL 8+, Fedora)
    Dnf,
    /// YUM (RHEL/CentOS 7)
    Yum,
}

impl std::fmt::Display for PackageManagerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageManagerType::Dnf => write!(f, "dnf"),
            PackageManagerType::Yum => write!(f, "yum"),
        }
    }
}
