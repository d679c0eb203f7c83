//! The `ctr` client binary.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

use crate::error::RuntimeError;

/// Default containerd socket.
pub const DEFAULT_ADDRESS: &str = "/run/containerd/containerd.sock";

/// Default containerd namespace.
pub const DEFAULT_NAMESPACE: &str = "k8s.io";

/// Default `ctr` binary.
pub const DEFAULT_CTR: &str = "ctr";

/// Captured result of one `ctr` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CtrOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit status (-1 if killed by a signal).
    pub status: i32,
}

impl CtrOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status,
        }
    }

    /// True if `ctr` exited 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs `ctr` subcommands.
#[async_trait]
pub trait CtrExec: Send + Sync {
    /// Run `ctr <args>` and capture its output. Exit status is not checked.
    async fn run(&self, args: &[String]) -> Result<CtrOutput, RuntimeError>;
}

/// The real `ctr` binary, bound to one socket and namespace.
#[derive(Debug, Clone)]
pub struct CtrBinary {
    binary: String,
    address: String,
    namespace: String,
}

impl CtrBinary {
    /// Create a driver for `binary` talking to `address` in `namespace`.
    pub fn new(
        binary: impl Into<String>,
        address: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            address: address.into(),
            namespace: namespace.into(),
        }
    }

    /// Global flags prepended to every invocation.
    pub fn global_args(&self) -> [&str; 4] {
        ["--address", &self.address, "--namespace", &self.namespace]
    }
}

impl Default for CtrBinary {
    fn default() -> Self {
        Self::new(DEFAULT_CTR, DEFAULT_ADDRESS, DEFAULT_NAMESPACE)
    }
}

#[async_trait]
impl CtrExec for CtrBinary {
    async fn run(&self, args: &[String]) -> Result<CtrOutput, RuntimeError> {
        trace!(binary = %self.binary, args = %args.join(" "), "ctr");
        let output = Command::new(&self.binary)
            .args(self.global_args())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CtrOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_args_select_socket_and_namespace() {
        let ctr = CtrBinary::new("ctr", "/tmp/c.sock", "havoc");
        assert_eq!(
            ctr.global_args(),
            ["--address", "/tmp/c.sock", "--namespace", "havoc"]
        );
        assert_eq!(CtrBinary::default().global_args()[3], "k8s.io");
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let ctr = CtrBinary::new("/nonexistent/ctr", DEFAULT_ADDRESS, DEFAULT_NAMESPACE);
        let err = ctr.run(&["version".to_string()]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
