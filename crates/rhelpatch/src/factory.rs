//! Host actor factory for creating SSH executors and package managers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rhelpatch_core::{CoreError, HostActorFactory, HostConfig, HostTooling};
use rhelpatch_exec::{LocalExecutor, RemoteExecutor, SshExecutorBuilder};
use rhelpatch_pkg::{DnfManager, PackageManager};
use tracing::{debug, info};

/// Builds executors from host config and detects dnf/yum over them
pub struct DefaultHostFactory {
    connect_timeout: Duration,
}

impl DefaultHostFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn build_executor(&self, config: &HostConfig) -> Result<Arc<dyn RemoteExecutor>, CoreError> {
        if config.is_local() {
            debug!(host = %config.name, "using local executor");
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let mut builder = SshExecutorBuilder::new(&config.addr, &config.user)
            .with_port(config.port)
            .with_connect_timeout(self.connect_timeout);
        if let Some(path) = &config.ssh_key {
            builder = builder.with_key_path(path);
        } else if let Some(var) = &config.ssh_key_env {
            builder = builder.with_env_key(var);
        }

        let executor = builder
            .build()
            .map_err(|e| CoreError::ConfigError(format!("{}: {e}", config.name)))?;
        Ok(Arc::new(executor))
    }
}

#[async_trait]
impl HostActorFactory for DefaultHostFactory {
    async fn create_executor(
        &self,
        config: &HostConfig,
    ) -> Result<Arc<dyn RemoteExecutor>, CoreError> {
        self.build_executor(config)
    }

    async fn create_tooling(
        &self,
        config: &HostConfig,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<HostTooling, CoreError> {
        // First contact with the host; an error here means it is unreachable
        let whoami = executor
            .run("whoami")
            .await
            .map_err(|e| CoreError::Connectivity(e.to_string()))?;
        let use_sudo = whoami.trimmed() != "root";

        let manager = DnfManager::detect(executor, use_sudo)
            .await
            .map_err(|e| CoreError::Facts(e.to_string()))?;
        info!(host = %config.name, tool = %manager.manager_type(), use_sudo, "host prepared");

        Ok(HostTooling {
            package_manager: Arc::new(manager),
            use_sudo,
        })
    }
}
