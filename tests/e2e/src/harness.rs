//! Docker-backed test harness.

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use havoc_core::{SelectionPolicy, SelectionError};
use havoc_runtime::{DockerRuntime, Runtime};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Small image that idles.
pub const IDLE_IMAGE: &str = "alpine:3.19";

/// Image with `tc` and `iptables`, used as target and as helper.
pub const TOOLS_IMAGE: &str = "nicolaka/netshoot:latest";

/// Label tying a container to one harness run.
const RUN_LABEL: &str = "io.havoc.e2e";

/// Errors that can occur during harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Command execution failed inside container.
    #[error("exec failed in {container}: exit={exit_code}, stderr={stderr}")]
    ExecFailed {
        /// Container name.
        container: String,
        /// Exit code from command.
        exit_code: i64,
        /// Standard error output.
        stderr: String,
    },

    /// Container inspection returned no state.
    #[error("container {0} has no state")]
    NoState(String),

    /// Selection policy could not be built.
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),
}

/// Result of executing a command inside a container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i64,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A container to start for a test.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    service: String,
    image: String,
    cmd: Vec<String>,
    labels: HashMap<String, String>,
    cap_add: Vec<String>,
}

impl TargetSpec {
    /// Idle container named after `service`.
    pub fn new(service: &str, image: &str) -> Self {
        Self {
            service: service.to_string(),
            image: image.to_string(),
            cmd: vec!["sleep".into(), "3600".into()],
            labels: HashMap::new(),
            cap_add: Vec::new(),
        }
    }

    /// Extra label.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Extra Linux capability, e.g. `NET_ADMIN`.
    pub fn cap_add(mut self, cap: &str) -> Self {
        self.cap_add.push(cap.to_string());
        self
    }
}

/// Runs disposable containers for one test.
///
/// Everything started here carries the run label; [`teardown`](Self::teardown)
/// force-removes all of it.
pub struct E2eHarness {
    docker: Docker,
    run_id: String,
    containers: Vec<String>,
}

impl E2eHarness {
    /// Connect to the local daemon with a fresh run ID.
    pub fn new() -> Result<Self, HarnessError> {
        let docker = Docker::connect_with_local_defaults()?;
        let run_id = uuid::Uuid::new_v4().as_simple().to_string()[..12].to_string();
        Ok(Self {
            docker,
            run_id,
            containers: Vec::new(),
        })
    }

    /// The per-run ID.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// havoc runtime sharing the harness client.
    pub fn runtime(&self) -> Arc<dyn Runtime> {
        Arc::new(DockerRuntime::from_client(
            self.docker.clone(),
            Duration::from_secs(5),
        ))
    }

    /// Full container name for a service.
    pub fn container_name(&self, service: &str) -> String {
        format!("havoc-e2e-{}-{service}", self.run_id)
    }

    /// Label selector matching only this run's containers.
    pub fn run_selector(&self) -> String {
        format!("{RUN_LABEL}={}", self.run_id)
    }

    /// Policy selecting `services` from this run, or all of them when empty.
    pub fn policy(&self, services: &[&str]) -> Result<SelectionPolicy, HarnessError> {
        Ok(SelectionPolicy::builder()
            .names(services.iter().map(|s| self.container_name(s)))
            .labels(vec![self.run_selector()])
            .build()?)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Pull `image` if missing.
    pub async fn ensure_image(&self, image: &str) -> Result<(), HarnessError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        debug!(image, "pulling test image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    /// Create and start a container; returns its name.
    pub async fn spawn(&mut self, spec: TargetSpec) -> Result<String, HarnessError> {
        self.ensure_image(&spec.image).await?;
        let name = self.container_name(&spec.service);
        let mut labels = spec.labels;
        labels.insert(RUN_LABEL.to_string(), self.run_id.clone());

        let config = Config {
            image: Some(spec.image),
            cmd: Some(spec.cmd),
            labels: Some(labels),
            host_config: Some(HostConfig {
                cap_add: (!spec.cap_add.is_empty()).then_some(spec.cap_add),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        self.containers.push(name.clone());
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(name)
    }

    /// Force-remove everything this run started.
    pub async fn teardown(&self) -> Result<(), HarnessError> {
        for name in &self.containers {
            let result = self
                .docker
                .remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await;
            if let Err(e) = result {
                // Removal faults delete their target themselves
                warn!(container = %name, error = %e, "teardown could not remove container");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Probes
    // ========================================================================

    /// Engine state string (`running`, `paused`, `exited`, ...).
    pub async fn state(&self, name: &str) -> Result<String, HarnessError> {
        let inspect = self.docker.inspect_container(name, None).await?;
        inspect
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .ok_or_else(|| HarnessError::NoState(name.to_string()))
    }

    /// True if the container still exists.
    pub async fn exists(&self, name: &str) -> bool {
        self.docker.inspect_container(name, None).await.is_ok()
    }

    /// Execute a command inside a container and return the result.
    pub async fn exec_in_container(
        &self,
        name: &str,
        cmd: Vec<&str>,
    ) -> Result<ExecResult, HarnessError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.docker.create_exec(name, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecResult {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    /// Execute a command, returning error on non-zero exit.
    pub async fn exec_ok(&self, name: &str, cmd: Vec<&str>) -> Result<ExecResult, HarnessError> {
        let result = self.exec_in_container(name, cmd).await?;
        if !result.success() {
            return Err(HarnessError::ExecFailed {
                container: name.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            });
        }
        Ok(result)
    }

    /// Root qdisc on `iface`, as printed by `tc`.
    pub async fn qdisc(&self, name: &str, iface: &str) -> Result<String, HarnessError> {
        let result = self
            .exec_ok(name, vec!["tc", "qdisc", "show", "dev", iface])
            .await?;
        Ok(result.stdout)
    }

    /// `INPUT` chain rules, as printed by `iptables -S`.
    pub async fn input_rules(&self, name: &str) -> Result<String, HarnessError> {
        let result = self.exec_ok(name, vec!["iptables", "-S", "INPUT"]).await?;
        Ok(result.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_spec_builder() {
        let spec = TargetSpec::new("web", IDLE_IMAGE)
            .label("tier", "front")
            .cap_add("NET_ADMIN");
        assert_eq!(spec.service, "web");
        assert_eq!(spec.cmd, vec!["sleep", "3600"]);
        assert_eq!(spec.labels["tier"], "front");
        assert_eq!(spec.cap_add, vec!["NET_ADMIN"]);
    }
}
