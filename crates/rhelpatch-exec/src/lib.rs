//! rhelpatch-exec: Command execution abstraction
//!
//! Provides the `RemoteExecutor` trait plus SSH and local implementations used
//! to drive patch sessions on target hosts.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use result::{CommandResult, ConnectionInfo};
pub use ssh::{SshExecutor, SshExecutorBuilder};
pub use traits::RemoteExecutor;
