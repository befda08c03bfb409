//! SSH/SFTP transfer backed by russh

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Pty};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{RemoteTransfer, TransferSession, TransferTarget};
use crate::error::{ProvisionError, ProvisionResult};

/// How server host keys are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Only accept keys listed in `~/.ssh/known_hosts`
    #[default]
    KnownHosts,
    /// Accept any key. Leaves sessions open to interception.
    AcceptAny,
}

impl HostKeyPolicy {
    pub fn from_skip_flag(skip_verification: bool) -> Self {
        if skip_verification {
            HostKeyPolicy::AcceptAny
        } else {
            HostKeyPolicy::KnownHosts
        }
    }
}

struct HostKeyCheck {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(host = %self.host, "Accepting SSH host key without verification");
                Ok(true)
            }
            HostKeyPolicy::KnownHosts => {
                match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!(host = %self.host, "Host key not found in known_hosts");
                        Ok(false)
                    }
                    Err(e) => {
                        warn!(host = %self.host, "Host key verification failed: {}", e);
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// [`RemoteTransfer`] over SSH with password authentication
pub struct SshTransfer {
    policy: HostKeyPolicy,
    config: Arc<client::Config>,
}

impl SshTransfer {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self {
            policy,
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for SshTransfer {
    fn default() -> Self {
        Self::new(HostKeyPolicy::default())
    }
}

fn ssh_error(message: String, host: &str) -> impl FnOnce(russh::Error) -> ProvisionError + '_ {
    move |e| ProvisionError::upstream(message).with_endpoint(host).with_cause(e)
}

#[async_trait]
impl RemoteTransfer for SshTransfer {
    async fn open(&self, target: &TransferTarget) -> ProvisionResult<Box<dyn TransferSession>> {
        let endpoint = format!("{}:{}", target.host, target.port);
        debug!(host = %endpoint, user = %target.username, "Opening SSH session");

        let handler = HostKeyCheck {
            host: target.host.clone(),
            port: target.port,
            policy: self.policy,
        };

        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(ssh_error(format!("Could not connect to {}", endpoint), &endpoint))?;

        let authenticated = handle
            .authenticate_password(&target.username, &target.password)
            .await
            .map_err(ssh_error(format!("SSH authentication to {} failed", endpoint), &endpoint))?;
        if !authenticated {
            return Err(ProvisionError::upstream(format!(
                "SSH authentication to {} rejected for {}",
                endpoint, target.username
            ))
            .with_endpoint(&endpoint));
        }

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(ssh_error("Could not open SFTP channel".to_string(), &endpoint))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(ssh_error("Could not start SFTP subsystem".to_string(), &endpoint))?;
        let sftp = SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ProvisionError::upstream("Could not start SFTP session")
                .with_endpoint(&endpoint)
                .with_cause(e)
        })?;

        info!(host = %endpoint, user = %target.username, "SSH session established");
        Ok(Box::new(SshSession {
            endpoint,
            handle,
            sftp,
        }))
    }
}

struct SshSession {
    endpoint: String,
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
}

#[async_trait]
impl TransferSession for SshSession {
    async fn copy_files(&mut self, local_paths: &[PathBuf], remote_dir: &str) -> ProvisionResult<()> {
        // Fails when the directory already exists
        if let Err(e) = self.sftp.create_dir(remote_dir).await {
            debug!(dir = %remote_dir, "create_dir: {}", e);
        }

        for local_path in local_paths {
            let content = tokio::fs::read(local_path).await.map_err(|e| {
                ProvisionError::upstream(format!("Could not open file {}", local_path.display()))
                    .with_status(500)
                    .with_cause(e)
            })?;
            let file_name = local_path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    ProvisionError::validation(format!("Invalid file name {}", local_path.display()))
                })?;
            let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), file_name);

            let mut remote_file = self.sftp.create(remote_path.as_str()).await.map_err(|e| {
                ProvisionError::upstream(format!("Could not create am file {}", remote_path))
                    .with_endpoint(&self.endpoint)
                    .with_cause(e)
            })?;
            remote_file.write_all(&content).await.map_err(|e| {
                ProvisionError::upstream(format!("Could not write am file {}", remote_path))
                    .with_endpoint(&self.endpoint)
                    .with_cause(e)
            })?;
            remote_file.shutdown().await.map_err(|e| {
                ProvisionError::upstream(format!("Could not close am file {}", remote_path))
                    .with_endpoint(&self.endpoint)
                    .with_cause(e)
            })?;

            debug!(remote = %remote_path, bytes = content.len(), "Copied file");
        }

        info!(host = %self.endpoint, dir = %remote_dir, files = local_paths.len(), "Files copied");
        Ok(())
    }

    async fn run_script(&mut self, command_line: &str) -> ProvisionResult<String> {
        let endpoint = self.endpoint.clone();
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(ssh_error("Could not open shell session".to_string(), &endpoint))?;

        channel
            .request_pty(false, "xterm", 80, 40, 0, 0, &[(Pty::ECHO, 0)])
            .await
            .map_err(ssh_error("Request for pseudo terminal failed".to_string(), &endpoint))?;
        channel
            .exec(true, command_line)
            .await
            .map_err(ssh_error(format!("Could not run {}", command_line), &endpoint))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        match exit_status {
            Some(0) => {
                info!(host = %endpoint, command = %command_line, "Script finished");
                Ok(output)
            }
            Some(status) => Err(ProvisionError::upstream(format!(
                "Script exited with status {}: {}",
                status,
                output.trim()
            ))
            .with_endpoint(&endpoint)),
            None => Err(ProvisionError::upstream(format!(
                "Script ended without exit status: {}",
                output.trim()
            ))
            .with_endpoint(&endpoint)),
        }
    }

    async fn close(self: Box<Self>) -> ProvisionResult<()> {
        if let Err(e) = self.sftp.close().await {
            debug!(host = %self.endpoint, "Closing SFTP session: {}", e);
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(ssh_error("Could not close SSH session".to_string(), &self.endpoint))
    }
}
