//! Post-patch health checks
//!
//! There are no built-in assertions. Callers register their own checks;
//! `CommandHealthCheck` covers the common "run this, expect that exit code" case.

use std::time::Duration;

use async_trait::async_trait;
use rhelpatch_exec::RemoteExecutor;
use serde::{Deserialize, Serialize};

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// An application-specific validation run during post-check
///
/// A failing check is reported; it never fails the session.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, executor: &dyn RemoteExecutor) -> HealthReport;
}

/// Declarative form of a `CommandHealthCheck`, as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub expect_exit: i32,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_check_timeout_secs() -> u64 {
    30
}

/// Runs a shell command and compares its exit status
#[derive(Debug, Clone)]
pub struct CommandHealthCheck {
    name: String,
    command: String,
    expect_exit: i32,
    timeout: Duration,
}

impl CommandHealthCheck {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            expect_exit: 0,
            timeout: Duration::from_secs(default_check_timeout_secs()),
        }
    }

    #[must_use]
    pub fn expect_exit(mut self, status: i32) -> Self {
        self.expect_exit = status;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&HealthCheckConfig> for CommandHealthCheck {
    fn from(config: &HealthCheckConfig) -> Self {
        Self::new(&config.name, &config.command)
            .expect_exit(config.expect_exit)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl HealthCheck for CommandHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, executor: &dyn RemoteExecutor) -> HealthReport {
        let (passed, detail) = match executor.run_with_timeout(&self.command, self.timeout).await
        {
            Ok(result) if result.status == self.expect_exit => {
                (true, format!("exit {}", result.status))
            }
            Ok(result) => (
                false,
                format!(
                    "exit {} (expected {}): {}",
                    result.status,
                    self.expect_exit,
                    result.combined_output().trim()
                ),
            ),
            Err(e) => (false, e.to_string()),
        };

        HealthReport {
            name: self.name.clone(),
            passed,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use rhelpatch_exec::LocalExecutor;

    use super::*;

    #[tokio::test]
    async fn test_command_check_passes_on_expected_exit() {
        let check = CommandHealthCheck::new("shell", "true");
        let report = check.check(&LocalExecutor::new()).await;
        assert!(report.passed);
        assert_eq!(report.name, "shell");
    }

    #[tokio::test]
    async fn test_command_check_reports_unexpected_exit() {
        let check = CommandHealthCheck::new("nginx", "echo inactive; exit 3");
        let report = check.check(&LocalExecutor::new()).await;
        assert!(!report.passed);
        assert!(report.detail.contains("exit 3 (expected 0)"));
        assert!(report.detail.contains("inactive"));
    }

    #[tokio::test]
    async fn test_from_config_honours_expected_exit() {
        let config: HealthCheckConfig =
            toml::from_str("name = \"absent\"\ncommand = \"exit 1\"\nexpect_exit = 1").unwrap();
        let report = CommandHealthCheck::from(&config)
            .check(&LocalExecutor::new())
            .await;
        assert!(report.passed);
    }
}
