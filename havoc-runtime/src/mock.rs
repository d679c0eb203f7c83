//! Mock runtime for testing.
//!
//! Holds a fixed container listing, records every call with its tokio
//! timestamp, and fails operations on demand.

use async_trait::async_trait;
use havoc_core::{HelperImage, Signal};
use havoc_types::{Container, ContainerState, ListOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::RuntimeError;
use crate::helper::{HelperGuard, HelperReaper};
use crate::runtime::{Engine, ExecOutput, RemoveOptions, Runtime};

/// Operations recorded by [`MockRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `list_containers`
    List,
    /// `exec_in_container`
    Exec,
    /// `exec_in_network_context`
    NetworkExec,
    /// `exec_in_cgroup_context`
    CgroupExec,
    /// Helper released (explicitly or by guard drop)
    ReleaseHelper,
    /// `kill`
    Kill,
    /// `stop`
    Stop,
    /// `start`
    Start,
    /// `pause`
    Pause,
    /// `unpause`
    Unpause,
    /// `restart`
    Restart,
    /// `remove`
    Remove,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Operation.
    pub op: MockOp,
    /// Target container ID (empty for listing).
    pub container: String,
    /// Operation details: command lines, signal name, etc.
    pub detail: Vec<String>,
    /// When the call was made.
    pub at: Instant,
}

/// Mock runtime for testing.
#[derive(Debug, Default, Clone)]
pub struct MockRuntime {
    inner: Arc<Mutex<MockRuntimeInner>>,
}

#[derive(Debug, Default)]
struct MockRuntimeInner {
    containers: Vec<Container>,
    calls: Vec<MockCall>,
    failures: HashMap<(MockOp, String), String>,
    list_failure: Option<String>,
    exec_outputs: HashMap<String, ExecOutput>,
    delays: HashMap<MockOp, Duration>,
    helper_exit: Option<Duration>,
    helper_seq: usize,
}

impl MockRuntime {
    /// Create a mock with an empty listing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock listing the given containers.
    pub fn with_containers(containers: Vec<Container>) -> Self {
        let mock = Self::new();
        mock.lock().containers = containers;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockRuntimeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the container listing.
    pub fn set_containers(&self, containers: Vec<Container>) {
        self.lock().containers = containers;
    }

    /// Make every `op` on `container_id` fail with `error`.
    pub fn fail_on(&self, op: MockOp, container_id: &str, error: &str) {
        self.lock()
            .failures
            .insert((op, container_id.to_string()), error.to_string());
    }

    /// Make the next listing fail with `error`.
    pub fn fail_next_list(&self, error: &str) {
        self.lock().list_failure = Some(error.to_string());
    }

    /// Output returned by `exec_in_container` for commands starting with `program`.
    pub fn set_exec_output(&self, program: &str, output: ExecOutput) {
        self.lock().exec_outputs.insert(program.to_string(), output);
    }

    /// Make `op` take `delay` (tokio time) before completing.
    pub fn delay(&self, op: MockOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Make stress helpers exit on their own `after` they start.
    ///
    /// Without this, helpers run until released.
    pub fn helper_exits_after(&self, after: Duration) {
        self.lock().helper_exit = Some(after);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Container IDs that saw `op`, in call order.
    pub fn targets_of(&self, op: MockOp) -> Vec<String> {
        self.calls_of(op).into_iter().map(|c| c.container).collect()
    }

    /// Clear recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    async fn record(
        &self,
        op: MockOp,
        container: &str,
        detail: Vec<String>,
    ) -> Result<(), RuntimeError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(MockCall {
                op,
                container: container.to_string(),
                detail,
                at: Instant::now(),
            });
            inner.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.lock().failures.get(&(op, container.to_string())) {
            Some(error) => Err(RuntimeError::Engine(error.clone())),
            None => Ok(()),
        }
    }
}

struct MockReaper {
    mock: MockRuntime,
    target: String,
    exit_after: Option<Duration>,
}

#[async_trait]
impl HelperReaper for MockReaper {
    async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError> {
        self.mock
            .record(
                MockOp::ReleaseHelper,
                &self.target,
                vec![helper_id.to_string()],
            )
            .await
    }

    async fn wait_exit(&self, _helper_id: &str) -> Result<(), RuntimeError> {
        match self.exit_after {
            Some(after) => {
                tokio::time::sleep(after).await;
                Ok(())
            }
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    fn engine(&self) -> Engine {
        Engine::Docker
    }

    async fn list_containers(&self, opts: &ListOptions) -> Result<Vec<Container>, RuntimeError> {
        self.record(MockOp::List, "", opts.labels.clone()).await?;
        let mut inner = self.lock();
        if let Some(error) = inner.list_failure.take() {
            return Err(RuntimeError::Engine(error));
        }
        let mut listed = Vec::new();
        for c in &inner.containers {
            if !opts.all && c.state() != ContainerState::Running {
                continue;
            }
            let matches = opts
                .matches_labels(c)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            if matches {
                listed.push(c.clone());
            }
        }
        Ok(listed)
    }

    async fn exec_in_container(
        &self,
        target: &Container,
        command: &[String],
        _privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        self.record(MockOp::Exec, target.id(), vec![command.join(" ")])
            .await?;
        let program = command.first().map(String::as_str).unwrap_or_default();
        Ok(self
            .lock()
            .exec_outputs
            .get(program)
            .cloned()
            .unwrap_or_default())
    }

    async fn exec_in_network_context(
        &self,
        target: &Container,
        helper: Option<&HelperImage>,
        tool: &str,
        commands: &[Vec<String>],
    ) -> Result<(), RuntimeError> {
        let mut detail: Vec<String> = commands
            .iter()
            .map(|c| crate::exec::command_line(tool, c).join(" "))
            .collect();
        if let Some(helper) = helper {
            detail.insert(0, format!("helper={}", helper.image));
        }
        self.record(MockOp::NetworkExec, target.id(), detail).await
    }

    async fn exec_in_cgroup_context(
        &self,
        target: &Container,
        helper: &HelperImage,
        command: &[String],
    ) -> Result<HelperGuard, RuntimeError> {
        self.record(
            MockOp::CgroupExec,
            target.id(),
            vec![format!("helper={}", helper.image), command.join(" ")],
        )
        .await?;
        let (id, exit_after) = {
            let mut inner = self.lock();
            inner.helper_seq += 1;
            (format!("mock-helper-{}", inner.helper_seq), inner.helper_exit)
        };
        Ok(HelperGuard::new(
            id,
            target.id(),
            Arc::new(MockReaper {
                mock: self.clone(),
                target: target.id().to_string(),
                exit_after,
            }),
        ))
    }

    async fn kill(&self, target: &Container, signal: &Signal) -> Result<(), RuntimeError> {
        self.record(MockOp::Kill, target.id(), vec![signal.name().to_string()])
            .await
    }

    async fn stop(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        self.record(MockOp::Stop, target.id(), vec![format!("{timeout:?}")])
            .await
    }

    async fn start(&self, target: &Container) -> Result<(), RuntimeError> {
        self.record(MockOp::Start, target.id(), vec![]).await
    }

    async fn pause(&self, target: &Container) -> Result<(), RuntimeError> {
        self.record(MockOp::Pause, target.id(), vec![]).await
    }

    async fn unpause(&self, target: &Container) -> Result<(), RuntimeError> {
        self.record(MockOp::Unpause, target.id(), vec![]).await
    }

    async fn restart(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        self.record(MockOp::Restart, target.id(), vec![format!("{timeout:?}")])
            .await
    }

    async fn remove(&self, target: &Container, opts: RemoveOptions) -> Result<(), RuntimeError> {
        self.record(
            MockOp::Remove,
            target.id(),
            vec![format!(
                "force={} links={} volumes={}",
                opts.force, opts.links, opts.volumes
            )],
        )
        .await
    }
}
