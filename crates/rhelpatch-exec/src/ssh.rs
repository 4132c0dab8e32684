//! SSH command execution using russh crate

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::result::{CommandResult, ConnectionInfo};
use crate::traits::RemoteExecutor;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Unanswered keepalives before russh drops the session
const KEEPALIVE_MAX: usize = 3;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys legitimately change when a host is rebuilt; trust on every connect
        Ok(true)
    }
}

/// SSH command executor
///
/// Holds at most one SSH session. The session is opened lazily on the first
/// command and can be dropped with `reset`, after which the next command
/// reconnects. That is how the reboot wait probes a host coming back up.
pub struct SshExecutor {
    conn_info: ConnectionInfo,
    key: ResolvedKey,
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(conn_info: ConnectionInfo, key_source: &KeySource) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            conn_info,
            key,
            session: Mutex::new(None),
        })
    }

    /// Get connection info
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    /// Open and authenticate a session unless a live one is already held
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn ensure_session(&self) -> Result<(), ExecError> {
        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            Some(handle) if !handle.is_closed() => return Ok(()),
            Some(_) => debug!("previous session closed by peer, reconnecting"),
            None => {}
        }
        *slot = None;

        let ConnectionInfo {
            host,
            port,
            user,
            connect_timeout,
        } = &self.conn_info;
        debug!(port, user = %user, "opening SSH session");

        let config = Arc::new(client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        });
        let dial = client::connect(config, (host.as_str(), *port), SshClientHandler);
        let mut handle = timeout(*connect_timeout, dial)
            .await
            .map_err(|_| ExecError::Timeout {
                timeout: *connect_timeout,
            })?
            .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        self.authenticate(&mut handle).await?;
        info!(host = %host, user = %user, "SSH session established");

        *slot = Some(handle);
        Ok(())
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
    ) -> Result<(), ExecError> {
        let secret = load_secret_key(self.key.path(), None)
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;
        // Only matters for RSA keys; older sshd on RHEL 7 lacks rsa-sha2
        let rsa_hash = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let outcome = handle
            .authenticate_publickey(
                &self.conn_info.user,
                PrivateKeyWithHashAlg::new(Arc::new(secret), rsa_hash),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if outcome.success() {
            Ok(())
        } else {
            Err(ExecError::AuthenticationFailed(format!(
                "{}@{} rejected the key {}",
                self.conn_info.user,
                self.conn_info.host,
                self.key.path().display()
            )))
        }
    }

    #[instrument(skip(self, cmd), fields(host = %self.conn_info.host))]
    async fn exec_on_session(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let mut slot = self.session.lock().await;
        let handle = slot.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "running remote command");
        let started = Instant::now();

        let channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                // Typical right after `shutdown -r`; forget the session so the next call redials
                slot.take();
                return Err(ExecError::ConnectionFailed(e.to_string()));
            }
        };
        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let result = collect_output(channel, started).await;
        debug!(
            command = %cmd,
            status = result.status,
            duration = ?result.duration,
            "remote command finished"
        );
        Ok(result)
    }
}

/// Drain a channel until it closes
///
/// `exit-status` can arrive after EOF, so EOF alone does not end the read.
/// A channel that closes without reporting a status yields -1, which is what
/// a host going down mid-command looks like.
async fn collect_output(
    mut channel: russh::Channel<client::Msg>,
    started: Instant,
) -> CommandResult {
    let mut status = -1;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => status = exit_status.cast_signed(),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    CommandResult {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration: started.elapsed(),
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.ensure_session().await?;
        self.exec_on_session(cmd).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        // Dialing is bounded separately by connect_timeout
        self.ensure_session().await?;

        timeout(timeout_duration, self.exec_on_session(cmd))
            .await
            .unwrap_or_else(|_| {
                warn!(
                    host = %self.conn_info.host,
                    command = %cmd,
                    timeout = ?timeout_duration,
                    "remote command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            })
    }

    async fn reset(&self) -> Result<(), ExecError> {
        let Some(handle) = self.session.lock().await.take() else {
            return Ok(());
        };
        // After a reboot the peer is gone and the goodbye fails
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "rhelpatch reset", "en")
            .await
        {
            debug!(host = %self.conn_info.host, error = %e, "SSH goodbye not delivered");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // A busy lock means a command is in flight over an open session
        self.session
            .try_lock()
            .map(|s| s.as_ref().is_some_and(|h| !h.is_closed()))
            .unwrap_or(true)
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Builder for `SshExecutor`
pub struct SshExecutorBuilder {
    conn_info: ConnectionInfo,
    key_source: KeySource,
}

impl SshExecutorBuilder {
    /// Create builder with required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
            key_source: KeySource::DefaultIdentity,
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.key_source = KeySource::Path(path.into());
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = KeySource::Env(var_name.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Bound connection attempts
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.conn_info.connect_timeout = timeout;
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        SshExecutor::new(self.conn_info, &self.key_source)
    }
}
