//! Remote command execution port.

use async_trait::async_trait;
use leasehold_core::Result;
use leasehold_core::server::{PASSWORD_MASK, Server};
use std::fmt;
use std::time::Duration;

/// Connection details for one target.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl From<&Server> for RemoteTarget {
    fn from(server: &Server) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
            password: server.password.clone(),
        }
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &PASSWORD_MASK)
            .finish()
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best description of a failure: stderr, else stdout, else the exit code.
    pub fn failure_message(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }
}

/// Runs a shell command on a target.
///
/// Implementations must give up after `timeout` and report that as
/// `Error::RemoteExecution`. A non-zero exit status is not an error.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_password() {
        let target = RemoteTarget {
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "root".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{target:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(target.to_string(), "root@10.0.0.1:22");
    }

    #[test]
    fn test_failure_message_prefers_stderr() {
        let out = CommandOutput {
            exit_code: 3,
            stdout: "partial".to_string(),
            stderr: " boom \n".to_string(),
        };
        assert_eq!(out.failure_message(), "boom");
        assert_eq!(
            CommandOutput { exit_code: 7, ..Default::default() }.failure_message(),
            "exit code 7"
        );
    }
}
