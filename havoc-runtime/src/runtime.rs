//! The container engine contract.

use async_trait::async_trait;
use havoc_core::{HelperImage, Signal};
use havoc_types::{Container, ListOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::RuntimeError;
use crate::helper::HelperGuard;

/// Supported container engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Docker Engine API
    #[default]
    Docker,
    /// containerd via `ctr`
    Containerd,
}

impl Engine {
    /// Engine name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Containerd => "containerd",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = RuntimeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "containerd" => Ok(Self::Containerd),
            other => Err(RuntimeError::Engine(format!("unknown engine {other:?}"))),
        }
    }
}

/// Result of running a command inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i64,
}

impl ExecOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Options for removing a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill a running container first.
    pub force: bool,
    /// Remove links.
    pub links: bool,
    /// Remove anonymous volumes.
    pub volumes: bool,
}

/// A container engine backend.
///
/// Both engines satisfy the same contract. Command sequences are not
/// transactional: they stop at the first failing command, and the error
/// names that command. Helper containers are always released, whether the
/// sequence succeeded, failed or was cancelled.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Which engine this is.
    fn engine(&self) -> Engine;

    /// List containers. Running only unless `opts.all`; labels AND-matched.
    async fn list_containers(&self, opts: &ListOptions) -> Result<Vec<Container>, RuntimeError>;

    /// Run one command directly in the target and capture its output.
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    async fn exec_in_container(
        &self,
        target: &Container,
        command: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError>;

    /// Run `tool` with each argument vector in the target's network namespace.
    ///
    /// Without a helper image the commands run directly in the target after
    /// checking that `tool` exists there. With one, a short-lived helper
    /// sharing the target's network namespace runs them and is then removed.
    async fn exec_in_network_context(
        &self,
        target: &Container,
        helper: Option<&HelperImage>,
        tool: &str,
        commands: &[Vec<String>],
    ) -> Result<(), RuntimeError>;

    /// Start a helper running `command` inside the target's cgroup.
    ///
    /// The helper keeps running until the returned guard is released.
    async fn exec_in_cgroup_context(
        &self,
        target: &Container,
        helper: &HelperImage,
        command: &[String],
    ) -> Result<HelperGuard, RuntimeError>;

    /// Stop and remove a helper started by [`Runtime::exec_in_cgroup_context`].
    async fn release_helper(&self, guard: HelperGuard) -> Result<(), RuntimeError> {
        guard.release().await
    }

    /// Send a signal to the container's main process.
    async fn kill(&self, target: &Container, signal: &Signal) -> Result<(), RuntimeError>;

    /// Stop the container, honouring its stop-signal label.
    async fn stop(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError>;

    /// Start a stopped container.
    async fn start(&self, target: &Container) -> Result<(), RuntimeError>;

    /// Freeze all processes in the container.
    async fn pause(&self, target: &Container) -> Result<(), RuntimeError>;

    /// Thaw a paused container.
    async fn unpause(&self, target: &Container) -> Result<(), RuntimeError>;

    /// Restart the container.
    async fn restart(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError>;

    /// Remove the container.
    async fn remove(&self, target: &Container, opts: RemoveOptions) -> Result<(), RuntimeError>;
}

/// Signal `stop` sends, taken from the container's stop-signal label.
///
/// `None` without a label. A label that is not a signal falls back to
/// `SIGTERM` with a warning.
pub(crate) fn label_stop_signal(target: &Container) -> Option<Signal> {
    let raw = target.stop_signal()?;
    match raw.parse() {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!(container = %target, label = raw, error = %e, "invalid stop signal label, using SIGTERM");
            Some(Signal::TERM)
        }
    }
}
