//! Remote file transfer and script execution
//!
//! The provisioner only sees [`RemoteTransfer`]; the SSH implementation lives
//! in [`ssh`], tests substitute a recording fake.

mod ssh;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::ProvisionResult;

pub use ssh::{HostKeyPolicy, SshTransfer};

pub const SSH_PORT: u16 = 22;

/// Host and credentials of a remote session
#[derive(Clone)]
pub struct TransferTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl TransferTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: SSH_PORT,
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Opens authenticated sessions to remote hosts
#[async_trait]
pub trait RemoteTransfer: Send + Sync {
    async fn open(&self, target: &TransferTarget) -> ProvisionResult<Box<dyn TransferSession>>;
}

/// An open shell and file channel to one host
#[async_trait]
pub trait TransferSession: Send {
    /// Copy local files into `remote_dir`, creating it if needed and
    /// overwriting files that already exist.
    async fn copy_files(&mut self, local_paths: &[PathBuf], remote_dir: &str) -> ProvisionResult<()>;

    /// Run a command in a pseudo-terminal and return its standard output.
    /// A non-zero exit status is an error.
    async fn run_script(&mut self, command_line: &str) -> ProvisionResult<String>;

    async fn close(self: Box<Self>) -> ProvisionResult<()>;
}
