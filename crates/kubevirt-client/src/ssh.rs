//! Remote command execution over SSH
//!
//! Runs the system `ssh` client as a child process. The private key is handed
//! over through a temp file readable only by the controller user; the child is
//! killed if the calling future is dropped.

use crate::error::KubevirtError;
use crate::kubevirt_trait::CommandExecutor;
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

/// Default login user on cluster nodes
pub const DEFAULT_SSH_USER: &str = "capk";
/// Seconds `ssh` waits for the TCP connection
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 10;

/// Executes commands on a VM through `ssh`
#[derive(Clone)]
pub struct SshCommandExecutor {
    address: String,
    user: String,
    public_key: Vec<u8>,
    private_key: Vec<u8>,
    connect_timeout_secs: u32,
}

impl std::fmt::Debug for SshCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCommandExecutor")
            .field("address", &self.address)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SshCommandExecutor {
    /// Create an executor for `address` authenticating with the cluster key pair
    pub fn new(address: impl Into<String>, public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            user: DEFAULT_SSH_USER.to_string(),
            public_key,
            private_key,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Log in as `user` instead of the default
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Public half of the key pair
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Arguments passed to `ssh` before the remote command
    fn ssh_args(&self, identity_file: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            identity_file.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", self.user, self.address),
        ]
    }
}

#[async_trait::async_trait]
impl CommandExecutor for SshCommandExecutor {
    async fn execute(&self, command: &str) -> Result<String, KubevirtError> {
        if self.address.is_empty() {
            return Err(KubevirtError::Ssh("VM has no address yet".to_string()));
        }

        // NamedTempFile is created 0600 and removed on drop
        let mut key_file = NamedTempFile::new()?;
        key_file.write_all(&self.private_key)?;
        key_file.flush()?;
        let identity = key_file.path().to_string_lossy().into_owned();

        debug!("Running '{}' on {}", command, self.address);
        let output = Command::new("ssh")
            .args(self.ssh_args(&identity))
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(KubevirtError::Ssh(format!(
                "'{}' on {} exited with {}: {}",
                command,
                self.address,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args() {
        let executor = SshCommandExecutor::new("10.244.0.12", b"ssh-rsa AAAA".to_vec(), b"KEY".to_vec());
        let args = executor.ssh_args("/tmp/key");

        assert_eq!(&args[..2], ["-i", "/tmp/key"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("capk@10.244.0.12"));
    }

    #[test]
    fn test_with_user() {
        let executor = SshCommandExecutor::new("10.0.0.1", Vec::new(), Vec::new()).with_user("core");
        assert_eq!(executor.ssh_args("k").last().map(String::as_str), Some("core@10.0.0.1"));
    }

    #[tokio::test]
    async fn test_execute_without_address_fails_fast() {
        let executor = SshCommandExecutor::new("", Vec::new(), Vec::new());
        let err = executor.execute("hostname").await.unwrap_err();
        assert!(matches!(err, KubevirtError::Ssh(_)));
    }
}
