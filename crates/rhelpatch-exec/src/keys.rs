//! SSH key management and resolution

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

/// Identity files tried, in order, when no key is configured
const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

static TEMP_KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SSH key resolution strategy
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from the named environment variable
    Env(String),
    /// First of `~/.ssh/id_ed25519`, `~/.ssh/id_ecdsa`, `~/.ssh/id_rsa` that exists
    DefaultIdentity,
}

impl KeySource {
    /// Resolve key source to a key file on disk
    ///
    /// For `Env`, decodes base64 and writes to a private temp file that is
    /// removed when the `ResolvedKey` is dropped.
    ///
    /// # Errors
    /// Returns `KeyError` if key resolution fails (env not set, invalid base64, etc.)
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
            KeySource::DefaultIdentity => {
                let home = env::var("HOME").map_err(|_| KeyError::EnvNotSet("HOME".into()))?;
                let ssh_dir = Path::new(&home).join(".ssh");
                let found = DEFAULT_IDENTITIES
                    .iter()
                    .map(|name| ssh_dir.join(name))
                    .find(|p| p.exists())
                    .ok_or_else(|| KeyError::NotFound(ssh_dir.display().to_string()))?;

                debug!(path = %found.display(), "using default SSH identity");
                validate_key_permissions(&found)?;
                Ok(ResolvedKey::Path(found))
            }
        }
    }
}

/// Resolved key location
#[derive(Debug)]
pub enum ResolvedKey {
    /// Path to key file
    Path(PathBuf),
    /// Temporary file (will be deleted on drop)
    Temp(PathBuf),
}

impl ResolvedKey {
    /// Get path for SSH library
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ResolvedKey::Path(p) | ResolvedKey::Temp(p) => p,
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // group/other bits must be clear
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let seq = TEMP_KEY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path =
        env::temp_dir().join(format!("rhelpatch_ssh_key_{}_{seq}", std::process::id()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)?;
    file.write_all(key_data)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                warn!(path = %path.display(), error = %e, "failed to remove temp key");
            }
        }
    }
}
