//! Configuration loading and types

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{WrapErr, bail};
use rhelpatch_core::{CommandHealthCheck, HealthCheck, HealthCheckConfig, HostConfig, PatchConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RHELPATCH_CONFIG";

/// Top-level configuration, one `rhelpatch.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub run: RunConfig,
    /// Managed hosts
    #[serde(default)]
    pub host: Vec<HostConfig>,
    /// Commands run against every host during post-check
    #[serde(default)]
    pub health_check: Vec<HealthCheckConfig>,
}

/// Settings for how a run is executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hosts patched concurrently
    #[serde(default = "default_forks")]
    pub forks: usize,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            forks: default_forks(),
            log_level: default_log_level(),
        }
    }
}

fn default_forks() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load from `explicit`, `$RHELPATCH_CONFIG`, or the first default path that exists
    ///
    /// Returns the path the config came from, `None` if defaults were used.
    ///
    /// # Errors
    /// Returns error if the chosen file cannot be read or parsed
    pub fn locate(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        for path in Self::default_paths() {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("rhelpatch.toml"),
            PathBuf::from("/etc/rhelpatch/rhelpatch.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("rhelpatch/rhelpatch.toml"));
        }
        paths
    }

    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> eyre::Result<()> {
        self.patch.validate().wrap_err("invalid [patch] section")?;

        if self.run.forks == 0 {
            bail!("[run] forks must be greater than zero");
        }

        let mut seen = HashSet::new();
        for host in &self.host {
            if host.name.trim().is_empty() {
                bail!("a [[host]] entry has an empty name");
            }
            if host.addr.trim().is_empty() {
                bail!("host {} has an empty addr", host.name);
            }
            if !seen.insert(host.name.as_str()) {
                bail!("host {} is defined more than once", host.name);
            }
        }

        for check in &self.health_check {
            if check.command.trim().is_empty() {
                bail!("health check {} has an empty command", check.name);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn health_checks(&self) -> Vec<Arc<dyn HealthCheck>> {
        self.health_check
            .iter()
            .map(|c| Arc::new(CommandHealthCheck::from(c)) as Arc<dyn HealthCheck>)
            .collect()
    }
}
