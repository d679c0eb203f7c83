//! Docker backend (bollard).
//!
//! Network commands either run directly in the target (`which` check, then
//! privileged exec as root) or in a sidecar created with
//! `network_mode = container:<target>` and `NET_ADMIN`. Stress runs in a
//! helper that joins the target's cgroup through `dockhack cg_exec`.

pub mod config;

use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::{StreamExt, TryStreamExt};
use havoc_core::{HelperImage, Signal};
use havoc_types::{Container, ListOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::exec::{exec_direct, run_sequence};
use crate::helper::{HelperGuard, HelperReaper};
use crate::runtime::{label_stop_signal, Engine, ExecOutput, RemoveOptions, Runtime};

use self::config::{
    cgroup_helper_config, container_from_summary, failed_exit_code, list_filters,
    network_helper_config,
};

/// Client timeout in seconds for Docker API calls.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Log lines kept from a failed helper.
const HELPER_LOG_TAIL: &str = "20";

/// Docker Engine backend.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    stop_wait: Duration,
}

impl DockerRuntime {
    /// Connect to a Docker daemon.
    ///
    /// `host` may be `unix:///path`, `tcp://host:port` or `http://host:port`;
    /// an empty host uses the local defaults (`DOCKER_HOST` or the default socket).
    pub fn connect(host: &str, stop_wait: Duration) -> Result<Self, RuntimeError> {
        let docker = if host.is_empty() {
            Docker::connect_with_local_defaults()?
        } else if host.starts_with("unix://") {
            Docker::connect_with_unix(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        } else {
            return Err(RuntimeError::Engine(format!(
                "unsupported docker host {host:?}"
            )));
        };
        Ok(Self::from_client(docker, stop_wait))
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker, stop_wait: Duration) -> Self {
        Self { docker, stop_wait }
    }

    // ========================================================================
    // Exec
    // ========================================================================

    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            privileged: Some(privileged),
            user: Some("root".to_string()),
            ..Default::default()
        };
        let exec = self.docker.create_exec(container_id, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(msg) = output.next().await {
                match msg? {
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
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "pulling helper image");
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

    async fn start_helper(
        &self,
        kind: &str,
        target: &Container,
        helper: &HelperImage,
        config: bollard::container::Config<String>,
        stop_first: bool,
    ) -> Result<HelperGuard, RuntimeError> {
        if helper.pull {
            self.pull(&helper.image).await?;
        }
        let name = format!("havoc_{kind}_{}", uuid::Uuid::new_v4().as_simple());
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::HelperFailed {
                helper: name.clone(),
                reason: e.to_string(),
            })?;

        let guard = HelperGuard::new(
            created.id.clone(),
            target.id(),
            Arc::new(DockerReaper {
                docker: self.docker.clone(),
                stop_first,
            }),
        );

        debug!(helper = %created.id, container = %target, image = %helper.image, "starting helper");
        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = guard.release().await {
                warn!(helper = %name, error = %cleanup, "cleanup of failed helper");
            }
            return Err(RuntimeError::HelperFailed {
                helper: name,
                reason: e.to_string(),
            });
        }
        Ok(guard)
    }

    async fn wait_stopped(&self, id: &str, wait: Duration) -> Result<(), RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = Box::pin(self.docker.wait_container(id, Some(options)));
        tokio::time::timeout(wait, async {
            // An error item here is a non-zero exit code, which still means stopped
            while stream.next().await.is_some() {}
        })
        .await
        .map_err(|_| RuntimeError::Timeout {
            operation: format!("waiting for {id} to stop"),
            after: wait,
        })
    }
}

struct DockerReaper {
    docker: Docker,
    stop_first: bool,
}

impl DockerReaper {
    /// `HelperFailed` if the helper already exited with a non-zero code.
    async fn exit_failure(&self, helper_id: &str) -> Option<RuntimeError> {
        let inspect = match self.docker.inspect_container(helper_id, None).await {
            Ok(inspect) => inspect,
            Err(e) => {
                debug!(helper = helper_id, error = %e, "cannot inspect helper");
                return None;
            }
        };
        let code = failed_exit_code(inspect.state.as_ref())?;
        let output = self.tail_logs(helper_id).await;
        Some(RuntimeError::HelperFailed {
            helper: helper_id.to_string(),
            reason: format!("exited with code {code}: {output}"),
        })
    }

    async fn tail_logs(&self, helper_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: HELPER_LOG_TAIL.to_string(),
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.logs(helper_id, Some(options)));
        let mut output = String::new();
        while let Some(Ok(chunk)) = stream.next().await {
            if let LogOutput::StdOut { message }
            | LogOutput::StdErr { message }
            | LogOutput::Console { message } = chunk
            {
                output.push_str(&String::from_utf8_lossy(&message));
            }
        }
        output.trim().to_string()
    }
}

#[async_trait]
impl HelperReaper for DockerReaper {
    async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError> {
        let failure = self.exit_failure(helper_id).await;
        if self.stop_first {
            if let Err(e) = self
                .docker
                .stop_container(helper_id, Some(StopContainerOptions { t: 1 }))
                .await
            {
                debug!(helper = helper_id, error = %e, "helper stop failed, removing anyway");
            }
        }
        self.docker
            .remove_container(
                helper_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        debug!(helper = helper_id, "helper removed");
        failure.map_or(Ok(()), Err)
    }

    async fn wait_exit(&self, helper_id: &str) -> Result<(), RuntimeError> {
        loop {
            let options = WaitContainerOptions {
                condition: "not-running".to_string(),
            };
            let mut stream = Box::pin(self.docker.wait_container(helper_id, Some(options)));
            match stream.next().await {
                // A non-zero exit arrives as an error item
                None | Some(Ok(_)) | Some(Err(DockerError::DockerContainerWaitError { .. })) => {
                    return Ok(())
                }
                // Long holds outlive the client timeout; wait again
                Some(Err(DockerError::RequestTimeoutError)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn engine(&self) -> Engine {
        Engine::Docker
    }

    async fn list_containers(&self, opts: &ListOptions) -> Result<Vec<Container>, RuntimeError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: opts.all,
                filters: list_filters(opts),
                ..Default::default()
            }))
            .await?;
        Ok(summaries.into_iter().map(container_from_summary).collect())
    }

    async fn exec_in_container(
        &self,
        target: &Container,
        command: &[String],
        privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        self.exec(target.id(), command.to_vec(), privileged).await
    }

    async fn exec_in_network_context(
        &self,
        target: &Container,
        helper: Option<&HelperImage>,
        tool: &str,
        commands: &[Vec<String>],
    ) -> Result<(), RuntimeError> {
        let Some(helper) = helper else {
            return exec_direct(self, target, tool, commands).await;
        };

        let config = network_helper_config(target.id(), &helper.image);
        let guard = self.start_helper("net", target, helper, config, false).await?;
        let helper_id = guard.id().to_string();

        let result = run_sequence(target.normalized_name(), tool, commands, |cmd| {
            let helper_id = helper_id.clone();
            async move { self.exec(&helper_id, cmd, false).await }
        })
        .await;

        let released = guard.release().await;
        if let Err(e) = &released {
            warn!(helper = %helper_id, error = %e, "failed to remove network helper");
        }
        result.and(released)
    }

    async fn exec_in_cgroup_context(
        &self,
        target: &Container,
        helper: &HelperImage,
        command: &[String],
    ) -> Result<HelperGuard, RuntimeError> {
        let config = cgroup_helper_config(target.id(), &helper.image, command);
        self.start_helper("stress", target, helper, config, true).await
    }

    async fn kill(&self, target: &Container, signal: &Signal) -> Result<(), RuntimeError> {
        info!(container = %target, signal = %signal, "kill");
        self.docker
            .kill_container(
                target.id(),
                Some(KillContainerOptions {
                    signal: signal.name(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(container = %target, ?timeout, "stop");
        let Some(signal) = label_stop_signal(target) else {
            self.docker
                .stop_container(
                    target.id(),
                    Some(StopContainerOptions {
                        t: timeout.as_secs() as i64,
                    }),
                )
                .await?;
            return Ok(());
        };

        self.kill(target, &signal).await?;
        if self.wait_stopped(target.id(), timeout).await.is_ok() {
            return Ok(());
        }
        warn!(container = %target, "container ignored stop signal, sending SIGKILL");
        self.kill(target, &Signal::KILL).await?;
        self.wait_stopped(target.id(), self.stop_wait).await
    }

    async fn start(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "start");
        self.docker
            .start_container(target.id(), None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn pause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "pause");
        self.docker.pause_container(target.id()).await?;
        Ok(())
    }

    async fn unpause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "unpause");
        self.docker.unpause_container(target.id()).await?;
        Ok(())
    }

    async fn restart(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(container = %target, ?timeout, "restart");
        self.docker
            .restart_container(
                target.id(),
                Some(RestartContainerOptions {
                    t: timeout.as_secs() as isize,
                }),
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, target: &Container, opts: RemoveOptions) -> Result<(), RuntimeError> {
        info!(container = %target, force = opts.force, links = opts.links, volumes = opts.volumes, "remove");
        self.docker
            .remove_container(
                target.id(),
                Some(RemoveContainerOptions {
                    force: opts.force,
                    link: opts.links,
                    v: opts.volumes,
                }),
            )
            .await?;
        Ok(())
    }
}
