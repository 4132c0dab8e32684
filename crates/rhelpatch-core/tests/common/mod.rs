//! Simulated RHEL host for session and actor tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rhelpatch_core::{
    CoreError, HostActorFactory, HostConfig, HostTooling, PatchConfig, PatchEvent, RebootTiming,
    SessionRunner,
};
use rhelpatch_exec::{CommandResult, ExecError, RemoteExecutor};
use rhelpatch_pkg::DnfManager;
use tokio::sync::broadcast;

pub const OLD_KERNEL: &str = "4.18.0-477.27.1.el8_8.x86_64";
pub const NEW_KERNEL: &str = "4.18.0-513.5.1.el8_9.x86_64";

struct State {
    reachable: bool,
    installed_kernel: String,
    running_kernel: String,
    pending_kernel: Option<String>,
    pending_packages: Vec<(String, String)>,
    boot: u32,
    /// Probes that fail after a reboot before the host answers again
    down_after_reboot: u32,
    down_remaining: u32,
    never_returns: bool,
    rebooted: bool,
    /// Exit status of the reboot command; `None` drops the connection
    reboot_exit: Option<i32>,
    advisory_exit: Option<i32>,
    /// `needs-restarting` cannot be executed at all
    advisory_errors: bool,
    /// Host drops off the network right after the advisory check
    lost_after_advisory: bool,
    upgrade_fails: bool,
    reboots: u32,
    resets: u32,
    commands: Vec<String>,
}

/// Answers the commands a patch session sends, with dnf-like behavior
pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                installed_kernel: OLD_KERNEL.to_string(),
                running_kernel: OLD_KERNEL.to_string(),
                pending_kernel: None,
                pending_packages: Vec::new(),
                boot: 1,
                down_after_reboot: 2,
                down_remaining: 0,
                never_returns: false,
                rebooted: false,
                reboot_exit: None,
                advisory_exit: None,
                advisory_errors: false,
                lost_after_advisory: false,
                upgrade_fails: false,
                reboots: 0,
                resets: 0,
                commands: Vec::new(),
            }),
        }
    }

    pub fn with_pending_kernel(self, version: &str) -> Self {
        self.state.lock().unwrap().pending_kernel = Some(version.to_string());
        self
    }

    pub fn with_pending_package(self, name: &str, version: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .pending_packages
            .push((name.to_string(), version.to_string()));
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().reachable = false;
        self
    }

    pub fn never_returns(self) -> Self {
        self.state.lock().unwrap().never_returns = true;
        self
    }

    pub fn rejects_reboot(self, status: i32) -> Self {
        self.state.lock().unwrap().reboot_exit = Some(status);
        self
    }

    pub fn advisory_exit(self, status: i32) -> Self {
        self.state.lock().unwrap().advisory_exit = Some(status);
        self
    }

    pub fn advisory_errors(self) -> Self {
        self.state.lock().unwrap().advisory_errors = true;
        self
    }

    pub fn lost_after_advisory(self) -> Self {
        self.state.lock().unwrap().lost_after_advisory = true;
        self
    }

    pub fn upgrade_fails(self) -> Self {
        self.state.lock().unwrap().upgrade_fails = true;
        self
    }

    pub fn reboots(&self) -> u32 {
        self.state.lock().unwrap().reboots
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().unwrap().resets
    }

    pub fn installed_kernel(&self) -> String {
        self.state.lock().unwrap().installed_kernel.clone()
    }

    pub fn running_kernel(&self) -> String {
        self.state.lock().unwrap().running_kernel.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    fn answer(state: &mut State, cmd: &str) -> Result<CommandResult, ExecError> {
        if !state.reachable {
            return Err(ExecError::ConnectionFailed("no route to host".into()));
        }
        if state.rebooted && state.never_returns {
            return Err(ExecError::ConnectionFailed("connection refused".into()));
        }
        if state.down_remaining > 0 {
            state.down_remaining -= 1;
            return Err(ExecError::ConnectionFailed("connection refused".into()));
        }

        let ok = |out: String| Ok(CommandResult::new(0, out));

        if cmd == "echo ok" {
            return ok("ok\n".into());
        }
        if cmd == "whoami" {
            return ok("root\n".into());
        }
        if cmd.starts_with("command -v ") {
            return ok(format!("/usr/bin/{}\n", &cmd["command -v ".len()..]));
        }
        if cmd.starts_with("rpm -q --last") {
            return ok(format!(
                "kernel-core-{}  Tue 14 Nov 2023 10:01:02 AM UTC\nkernel-core-4.18.0-425.3.1.el8.x86_64  Mon 02 Jan 2023 09:00:00 AM UTC\n",
                state.installed_kernel
            ));
        }
        if cmd == "uname -r" {
            return ok(format!("{}\n", state.running_kernel));
        }
        if cmd.contains("boot_id") {
            return ok(format!("6d1b5c2e-0000-4000-8000-{:012}\n", state.boot));
        }
        if cmd.starts_with("df ") {
            return ok("Filesystem     1024-blocks    Used Available Capacity Mounted on\n\
                       /dev/mapper/rhel-root  52403200 8123456  44279744      16% /\n"
                .into());
        }
        if cmd == "cat /proc/meminfo" {
            return ok("MemTotal:       16303428 kB\nMemFree:         1022344 kB\nMemAvailable:   12345678 kB\nSwapTotal:       2097148 kB\nSwapFree:        2097148 kB\n".into());
        }
        if cmd == "cat /proc/uptime" {
            let secs = if state.rebooted { 42.5 } else { 1_209_600.0 };
            return ok(format!("{secs} 100.0\n"));
        }
        if cmd.starts_with("rpm -qa") {
            return ok(format!(
                "bash\t(none):4.4.20-4.el8_6\tx86_64\nkernel-core\t(none):{}\tx86_64\nopenssl\t1:1.1.1k-9.el8_7\tx86_64\n",
                state.installed_kernel
            ));
        }
        if cmd.contains("check-update") {
            let mut lines = String::new();
            if let Some(kernel) = &state.pending_kernel {
                lines.push_str(&format!("kernel-core.x86_64  {kernel}  baseos\n"));
            }
            for (name, version) in &state.pending_packages {
                lines.push_str(&format!("{name}.x86_64  {version}  baseos\n"));
            }
            let status = if lines.is_empty() { 0 } else { 100 };
            return Ok(CommandResult::new(status, format!("\n{lines}")));
        }
        if cmd.contains("clean all") {
            return ok("0 files removed\n".into());
        }
        if cmd.contains("-y upgrade") || cmd.contains("-y update") {
            if state.upgrade_fails {
                return Ok(CommandResult {
                    status: 1,
                    stdout: String::new(),
                    stderr: "Error: Failed to download metadata for repo 'baseos'".into(),
                    duration: Duration::from_millis(5),
                });
            }
            if let Some(kernel) = state.pending_kernel.take() {
                state.installed_kernel = kernel;
            }
            state.pending_packages.clear();
            return ok("Complete!\n".into());
        }
        if cmd.contains("shutdown -r") {
            if let Some(status) = state.reboot_exit {
                return Ok(CommandResult {
                    status,
                    stdout: String::new(),
                    stderr: "Failed to set wall message".into(),
                    duration: Duration::from_millis(5),
                });
            }
            state.reboots += 1;
            state.boot += 1;
            state.rebooted = true;
            state.running_kernel = state.installed_kernel.clone();
            state.down_remaining = state.down_after_reboot;
            return Err(ExecError::ConnectionFailed("connection reset by peer".into()));
        }
        if cmd == "needs-restarting -r" {
            if state.lost_after_advisory {
                state.reachable = false;
            }
            if state.advisory_errors {
                return Err(ExecError::IoError("channel closed before exec".into()));
            }
            let status = state.advisory_exit.unwrap_or(
                if state.running_kernel == state.installed_kernel { 0 } else { 1 },
            );
            return Ok(CommandResult::new(status, "Reboot advice\n"));
        }

        Ok(CommandResult {
            status: 127,
            stdout: String::new(),
            stderr: format!("sh: {cmd}: command not found"),
            duration: Duration::from_millis(1),
        })
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(cmd.to_string());
        Self::answer(&mut state, cmd)
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    async fn reset(&self) -> Result<(), ExecError> {
        self.state.lock().unwrap().resets += 1;
        Ok(())
    }

    fn executor_type(&self) -> &'static str {
        "fake"
    }
}

pub fn fast_timing() -> RebootTiming {
    RebootTiming {
        timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        post_reboot_delay: Duration::from_millis(1),
        probe_timeout: Duration::from_millis(100),
    }
}

pub fn runner(
    host: &Arc<FakeHost>,
    config: PatchConfig,
) -> (SessionRunner, broadcast::Receiver<PatchEvent>) {
    let (tx, rx) = broadcast::channel(256);
    let executor: Arc<dyn RemoteExecutor> = host.clone();
    let packages = Arc::new(DnfManager::new(executor.clone(), false));
    let runner = SessionRunner::new("web01", Arc::new(config), executor, packages, tx)
        .with_reboot_timing(fast_timing());
    (runner, rx)
}

/// Hands out pre-built fake hosts by name; unknown names fail like a bad key
#[derive(Default)]
pub struct FakeFactory {
    hosts: HashMap<String, Arc<FakeHost>>,
}

impl FakeFactory {
    pub fn with_host(mut self, name: &str, host: FakeHost) -> Self {
        self.hosts.insert(name.to_string(), Arc::new(host));
        self
    }

    pub fn host(&self, name: &str) -> Arc<FakeHost> {
        self.hosts[name].clone()
    }
}

#[async_trait]
impl HostActorFactory for FakeFactory {
    async fn create_executor(
        &self,
        config: &HostConfig,
    ) -> Result<Arc<dyn RemoteExecutor>, CoreError> {
        self.hosts
            .get(&config.name)
            .map(|h| h.clone() as Arc<dyn RemoteExecutor>)
            .ok_or_else(|| CoreError::ConfigError(format!("no key for {}", config.name)))
    }

    async fn create_tooling(
        &self,
        _config: &HostConfig,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<HostTooling, CoreError> {
        executor
            .run("whoami")
            .await
            .map_err(|e| CoreError::Connectivity(e.to_string()))?;
        let manager = DnfManager::detect(executor, false)
            .await
            .map_err(|e| CoreError::Update(e.to_string()))?;
        Ok(HostTooling {
            package_manager: Arc::new(manager),
            use_sudo: false,
        })
    }
}
