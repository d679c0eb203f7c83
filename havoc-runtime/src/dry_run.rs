//! Dry-run decorator.
//!
//! Wraps any [`Runtime`]: listing is delegated so selection runs for real,
//! every side-effecting call is logged and reported as successful.

use async_trait::async_trait;
use havoc_core::{HelperImage, Signal};
use havoc_types::{Container, ListOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::RuntimeError;
use crate::exec::command_line;
use crate::helper::HelperGuard;
use crate::runtime::{Engine, ExecOutput, RemoveOptions, Runtime};

/// Runtime that only pretends to change anything.
pub struct DryRunRuntime {
    inner: Arc<dyn Runtime>,
}

impl DryRunRuntime {
    /// Wrap a runtime.
    pub fn new(inner: Arc<dyn Runtime>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Runtime for DryRunRuntime {
    fn engine(&self) -> Engine {
        self.inner.engine()
    }

    async fn list_containers(&self, opts: &ListOptions) -> Result<Vec<Container>, RuntimeError> {
        self.inner.list_containers(opts).await
    }

    async fn exec_in_container(
        &self,
        target: &Container,
        command: &[String],
        _privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        info!(dry_run = true, container = %target, command = %command.join(" "), "exec");
        Ok(ExecOutput::default())
    }

    async fn exec_in_network_context(
        &self,
        target: &Container,
        helper: Option<&HelperImage>,
        tool: &str,
        commands: &[Vec<String>],
    ) -> Result<(), RuntimeError> {
        for cmd in commands {
            info!(
                dry_run = true,
                container = %target,
                helper = helper.map(|h| h.image.as_str()).unwrap_or("-"),
                command = %command_line(tool, cmd).join(" "),
                "network exec"
            );
        }
        Ok(())
    }

    async fn exec_in_cgroup_context(
        &self,
        target: &Container,
        helper: &HelperImage,
        command: &[String],
    ) -> Result<HelperGuard, RuntimeError> {
        info!(
            dry_run = true,
            container = %target,
            helper = %helper.image,
            command = %command.join(" "),
            "cgroup exec"
        );
        Ok(HelperGuard::detached("dry-run", target.id()))
    }

    async fn kill(&self, target: &Container, signal: &Signal) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, signal = %signal, "kill");
        Ok(())
    }

    async fn stop(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, ?timeout, "stop");
        Ok(())
    }

    async fn start(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, "start");
        Ok(())
    }

    async fn pause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, "pause");
        Ok(())
    }

    async fn unpause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, "unpause");
        Ok(())
    }

    async fn restart(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(dry_run = true, container = %target, ?timeout, "restart");
        Ok(())
    }

    async fn remove(&self, target: &Container, opts: RemoveOptions) -> Result<(), RuntimeError> {
        info!(
            dry_run = true,
            container = %target,
            force = opts.force,
            links = opts.links,
            volumes = opts.volumes,
            "remove"
        );
        Ok(())
    }
}
