//! DNF package manager (RHEL/CentOS/Rocky/Alma/Fedora)

use std::sync::Arc;

use async_trait::async_trait;
use rhelpatch_exec::RemoteExecutor;
use tracing::{debug, info, instrument};

use crate::error::PackageError;
use crate::traits::PackageManager;
use crate::types::{
    InstalledPackage, PackageManagerType, RebootAdvice, RepoSelection, UpdateResult,
    UpgradablePackage,
};

const RPM_QUERY: &str = r"rpm -qa --queryformat '%{NAME}\t%{EPOCH}:%{VERSION}-%{RELEASE}\t%{ARCH}\n'";

/// `check-update` exit status meaning "updates are available"
const UPDATES_AVAILABLE: i32 = 100;

/// DNF package manager implementation
///
/// Falls back to `yum` on hosts without `dnf`.
pub struct DnfManager {
    executor: Arc<dyn RemoteExecutor>,
    use_sudo: bool,
    tool: PackageManagerType,
}

impl DnfManager {
    /// Create a manager that drives `dnf`
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            executor,
            use_sudo,
            tool: PackageManagerType::Dnf,
        }
    }

    /// Probe the host for dnf, then yum
    ///
    /// # Errors
    /// Returns `PackageError::ManagerNotFound` if neither is installed
    pub async fn detect(
        executor: Arc<dyn RemoteExecutor>,
        use_sudo: bool,
    ) -> Result<Self, PackageError> {
        let mut manager = Self::new(executor, use_sudo);

        if manager.has_command("dnf").await {
            manager.tool = PackageManagerType::Dnf;
        } else if manager.has_command("yum").await {
            manager.tool = PackageManagerType::Yum;
        } else {
            return Err(PackageError::ManagerNotFound(
                "neither dnf nor yum found".to_string(),
            ));
        }

        info!(tool = %manager.tool, use_sudo, "detected package manager");
        Ok(manager)
    }

    async fn has_command(&self, name: &str) -> bool {
        self.executor
            .run(&format!("command -v {name}"))
            .await
            .map(|r| r.success())
            .unwrap_or(false)
    }

    /// Build dnf/yum command with optional sudo
    fn pkg_cmd(&self, args: &str) -> String {
        let tool = self.tool;
        if self.use_sudo {
            format!("sudo -n {tool} {args}")
        } else {
            format!("{tool} {args}")
        }
    }

    fn with_repos(args: &str, repos: &RepoSelection) -> Result<String, PackageError> {
        let flags = repos.to_flags()?;
        if flags.is_empty() {
            Ok(args.to_string())
        } else {
            Ok(format!("{args} {flags}"))
        }
    }

    /// Parse `check-update` output
    ///
    /// Long package names make dnf wrap a row onto two lines, so a lone name
    /// is carried over and joined with the next line.
    fn parse_upgradable(output: &str) -> Vec<UpgradablePackage> {
        let mut packages = Vec::new();
        let mut carried: Option<&str> = None;

        for line in output.lines() {
            if line.starts_with("Obsoleting Packages") {
                break;
            }
            if line.trim().is_empty()
                || line.starts_with("Last metadata")
                || line.starts_with("Security:")
            {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let row = match (carried.take(), parts.as_slice()) {
                (None, [name_arch, version, repo]) => Some((*name_arch, *version, *repo)),
                (Some(name_arch), [version, repo]) => Some((name_arch, *version, *repo)),
                (None, [name_arch]) => {
                    carried = Some(*name_arch);
                    None
                }
                _ => None,
            };

            let Some((name_arch, version, repo)) = row else {
                continue;
            };

            // name.arch; anything without an arch suffix is a header
            let Some(idx) = name_arch.rfind('.') else {
                continue;
            };
            packages.push(
                UpgradablePackage::new(&name_arch[..idx], version)
                    .with_arch(&name_arch[idx + 1..])
                    .with_repository(repo),
            );
        }

        packages
    }

    fn parse_installed(output: &str) -> Vec<InstalledPackage> {
        output
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let name = fields.next()?.trim();
                let evr = fields.next()?.trim();
                let arch = fields.next()?.trim();
                if name.is_empty() {
                    return None;
                }
                let version = evr.strip_prefix("(none):").unwrap_or(evr);
                Some(InstalledPackage {
                    name: name.to_string(),
                    version: version.to_string(),
                    arch: arch.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl PackageManager for DnfManager {
    #[instrument(skip(self))]
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageError> {
        let result = self
            .executor
            .run(RPM_QUERY)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(PackageError::from_failure(result.status, &result.stderr));
        }

        let packages = Self::parse_installed(&result.stdout);
        debug!(count = packages.len(), "collected installed packages");
        Ok(packages)
    }

    #[instrument(skip(self))]
    async fn list_upgradable(
        &self,
        repos: &RepoSelection,
    ) -> Result<Vec<UpgradablePackage>, PackageError> {
        let cmd = self.pkg_cmd(&Self::with_repos("-q check-update", repos)?);
        let result = self
            .executor
            .run(&cmd)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        match result.status {
            0 => Ok(Vec::new()),
            UPDATES_AVAILABLE => {
                let packages = Self::parse_upgradable(&result.stdout);
                debug!(count = packages.len(), "found upgradable packages");
                Ok(packages)
            }
            status => Err(PackageError::from_failure(status, &result.stderr)),
        }
    }

    #[instrument(skip(self))]
    async fn clean_cache(&self) -> Result<(), PackageError> {
        let result = self
            .executor
            .run(&self.pkg_cmd("clean all"))
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(PackageError::from_failure(result.status, &result.stderr));
        }
        debug!("package cache cleaned");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upgrade_all(&self, repos: &RepoSelection) -> Result<UpdateResult, PackageError> {
        let pending = self.list_upgradable(repos).await?;
        if pending.is_empty() {
            info!("no updates available");
            return Ok(UpdateResult::unchanged("no changes: all packages are up to date"));
        }

        info!(pending = pending.len(), tool = %self.tool, "upgrading packages");

        let verb = match self.tool {
            PackageManagerType::Dnf => "upgrade",
            PackageManagerType::Yum => "update",
        };
        let cmd = self.pkg_cmd(&Self::with_repos(&format!("-y {verb}"), repos)?);
        let result = self
            .executor
            .run(&cmd)
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(PackageError::from_failure(result.status, &result.stderr));
        }

        // Another run may have raced us between check-update and upgrade
        if result.stdout.contains("Nothing to do") {
            return Ok(UpdateResult::unchanged("no changes: all packages are up to date"));
        }

        let update = UpdateResult::upgraded(pending.into_iter().map(|p| p.name).collect());
        info!(upgraded = update.upgraded_count(), "package upgrade completed");
        Ok(update)
    }

    #[instrument(skip(self))]
    async fn reboot_required(&self) -> Result<RebootAdvice, PackageError> {
        let result = self
            .executor
            .run("needs-restarting -r")
            .await
            .map_err(|e| PackageError::ExecutionError(e.to_string()))?;

        Ok(RebootAdvice::from_exit_status(
            result.status,
            &result.combined_output(),
        ))
    }

    fn manager_type(&self) -> PackageManagerType {
        self.tool
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use rhelpatch_exec::{CommandResult, ExecError};

    use super::*;

    /// Replies by command prefix and records every command it sees
    #[derive(Default)]
    struct ScriptedExecutor {
        replies: HashMap<&'static str, CommandResult>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn reply(mut self, prefix: &'static str, status: i32, stdout: &str) -> Self {
            self.replies.insert(prefix, CommandResult::new(status, stdout));
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
            self.seen.lock().unwrap().push(cmd.to_string());
            self.replies
                .iter()
                .find(|(prefix, _)| cmd.starts_with(*prefix))
                .map(|(_, r)| r.clone())
                .ok_or_else(|| ExecError::IoError(format!("unexpected command: {cmd}")))
        }

        async fn run_with_timeout(
            &self,
            cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, ExecError> {
            self.run(cmd).await
        }

        fn executor_type(&self) -> &'static str {
            "scripted"
        }
    }

    #[test]
    fn test_parse_upgradable() {
        let output = r"Last metadata expiration check: 0:05:31 ago.
vim-enhanced.x86_64 2:8.2.2637-20.el9_1 baseos
curl.x86_64         7.76.1-26.el9_0 baseos";

        let packages = DnfManager::parse_upgradable(output);

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "vim-enhanced");
        assert_eq!(packages[0].new_version, "2:8.2.2637-20.el9_1");
        assert_eq!(packages[1].arch.as_deref(), Some("x86_64"));
    }

    #[test]
    fn test_parse_upgradable_wrapped_and_obsoletes() {
        let output = "kernel.x86_64  4.18.0-513.el8  baseos
python3-some-really-long-package-name.noarch
                4.1-2.el8  appstream
Obsoleting Packages
grub2-tools.x86_64  1:2.02-150.el8  baseos";

        let packages = DnfManager::parse_upgradable(output);

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "kernel");
        assert_eq!(packages[1].name, "python3-some-really-long-package-name");
        assert_eq!(packages[1].repository.as_deref(), Some("appstream"));
    }

    #[test]
    fn test_parse_installed_strips_missing_epoch() {
        let output = "bash\t(none):4.4.20-4.el8\tx86_64\nvim-enhanced\t2:8.0.1763-19.el8\tx86_64\n";
        let packages = DnfManager::parse_installed(output);

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].version, "4.4.20-4.el8");
        assert_eq!(packages[1].version, "2:8.0.1763-19.el8");
    }

    #[tokio::test]
    async fn test_upgrade_with_nothing_pending_is_unchanged() {
        let executor = Arc::new(ScriptedExecutor::default().reply("dnf -q check-update", 0, ""));
        let manager = DnfManager::new(executor.clone(), false);

        let result = manager.upgrade_all(&RepoSelection::default()).await.unwrap();

        assert!(!result.changed);
        assert!(result.message.contains("no changes"));
        // never reached the upgrade itself
        assert!(!executor.seen().iter().any(|c| c.contains("-y upgrade")));
    }

    #[tokio::test]
    async fn test_upgrade_passes_repo_flags_and_sudo() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .reply(
                    "sudo -n dnf -q check-update",
                    100,
                    "kernel.x86_64 4.18.0-2.el8 baseos\n",
                )
                .reply("sudo -n dnf -y upgrade", 0, "Complete!\n"),
        );
        let manager = DnfManager::new(executor.clone(), true);
        let repos = RepoSelection::new(vec!["epel".into()], vec!["baseos".into()]);

        let result = manager.upgrade_all(&repos).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.upgraded_packages, vec!["kernel"]);
        assert!(
            executor
                .seen()
                .contains(&"sudo -n dnf -y upgrade --disablerepo=epel --enablerepo=baseos".to_string())
        );
    }

    #[tokio::test]
    async fn test_upgrade_failure_maps_to_error() {
        let mut failing = CommandResult::new(1, "");
        failing.stderr = "Error: Failed to download metadata for repo 'baseos'".to_string();

        let mut executor = ScriptedExecutor::default().reply(
            "dnf -q check-update",
            100,
            "curl.x86_64 7.61.1-30.el8 baseos\n",
        );
        executor.replies.insert("dnf -y upgrade", failing);
        let manager = DnfManager::new(Arc::new(executor), false);

        let err = manager
            .upgrade_all(&RepoSelection::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::RepositoryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_check_update_error_status() {
        let executor = Arc::new(ScriptedExecutor::default().reply("dnf -q check-update", 1, ""));
        let manager = DnfManager::new(executor, false);

        let err = manager
            .list_upgradable(&RepoSelection::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::CommandFailed { status: 1, .. }));
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_yum() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .reply("command -v dnf", 1, "")
                .reply("command -v yum", 0, "/usr/bin/yum\n"),
        );
        let manager = DnfManager::detect(executor, false).await.unwrap();
        assert_eq!(manager.manager_type(), PackageManagerType::Yum);
        assert_eq!(manager.pkg_cmd("clean all"), "yum clean all");
    }

    #[tokio::test]
    async fn test_reboot_required_maps_exit_codes() {
        let executor = Arc::new(ScriptedExecutor::default().reply("needs-restarting -r", 1, ""));
        let manager = DnfManager::new(executor, false);
        assert_eq!(manager.reboot_required().await.unwrap(), RebootAdvice::Needed);
    }
}
