//! containerd backend, driven through the `ctr` client binary.
//!
//! Network sidecars join the target's network namespace through
//! `/proc/<pid>/ns/net`; stress helpers are placed in the target's cgroup.
//! Helpers are torn down with SIGTERM, a bounded wait, a SIGKILL fallback,
//! then task and container deletion. A helper whose task already stopped is
//! not signalled; its exit status comes back from `tasks delete`.

pub mod ctr;
pub mod parse;

use async_trait::async_trait;
use havoc_core::{HelperImage, Signal};
use havoc_types::{Container, ContainerState, ListOptions, SKIP_LABEL};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::exec::{exec_direct, run_sequence};
use crate::helper::{HelperGuard, HelperReaper};
use crate::runtime::{label_stop_signal, Engine, ExecOutput, RemoveOptions, Runtime};

use self::ctr::{CtrExec, CtrOutput};
use self::parse::{parse_ids, parse_tasks, ContainerInfo, TaskInfo};

/// Command that keeps a network sidecar alive.
pub const SIDECAR_COMMAND: [&str; 2] = ["sleep", "300"];

/// Interval between task status polls while waiting for an exit.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between task status polls while watching a running helper.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

fn is_live(task: Option<&TaskInfo>) -> bool {
    task.is_some_and(|t| matches!(t.state, ContainerState::Running | ContainerState::Paused))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Run a `ctr` command and fail on non-zero exit.
async fn ctr_ok(ctr: &dyn CtrExec, cmd: Vec<String>) -> Result<String, RuntimeError> {
    let output = ctr.run(&cmd).await?;
    if output.success() {
        return Ok(output.stdout);
    }
    Err(RuntimeError::Ctr {
        command: cmd.join(" "),
        exit_code: output.status,
        stderr: output.stderr.trim().to_string(),
    })
}

async fn task_table(ctr: &dyn CtrExec) -> Result<HashMap<String, TaskInfo>, RuntimeError> {
    parse_tasks(&ctr_ok(ctr, args(&["tasks", "ls"])).await?)
}

/// Poll until the task is gone or no longer running. Returns false on timeout.
async fn wait_task_exit(
    ctr: &dyn CtrExec,
    id: &str,
    timeout: Duration,
) -> Result<bool, RuntimeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_live(task_table(ctr).await?.get(id)) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// containerd backend.
#[derive(Clone)]
pub struct ContainerdRuntime {
    ctr: Arc<dyn CtrExec>,
    teardown_timeout: Duration,
    stop_wait: Duration,
}

impl ContainerdRuntime {
    /// Create a backend over a `ctr` driver.
    ///
    /// `teardown_timeout` bounds the wait for a helper to exit after SIGTERM;
    /// `stop_wait` bounds the wait after a SIGKILL fallback.
    pub fn new(ctr: Arc<dyn CtrExec>, teardown_timeout: Duration, stop_wait: Duration) -> Self {
        Self {
            ctr,
            teardown_timeout,
            stop_wait,
        }
    }

    async fn ctr_ok(&self, cmd: Vec<String>) -> Result<String, RuntimeError> {
        ctr_ok(self.ctr.as_ref(), cmd).await
    }

    async fn info(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        ContainerInfo::parse(&self.ctr_ok(args(&["containers", "info", id])).await?)
    }

    /// The target's task, which must be running or paused.
    async fn live_task(&self, target: &Container) -> Result<TaskInfo, RuntimeError> {
        let tasks = task_table(self.ctr.as_ref()).await?;
        match tasks.get(target.id()) {
            Some(task) if matches!(task.state, ContainerState::Running | ContainerState::Paused) => {
                Ok(*task)
            }
            Some(task) => Err(RuntimeError::NotRunning {
                container: target.normalized_name().to_string(),
                state: task.state.to_string(),
            }),
            None => Err(RuntimeError::NotRunning {
                container: target.normalized_name().to_string(),
                state: "no task".to_string(),
            }),
        }
    }

    async fn exec_in(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        let exec_id = format!("havoc-exec-{}", uuid::Uuid::new_v4().as_simple());
        let mut full = args(&["tasks", "exec", "--exec-id", &exec_id, container_id]);
        full.extend(cmd.iter().cloned());
        let CtrOutput {
            stdout,
            stderr,
            status,
        } = self.ctr.run(&full).await?;
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: i64::from(status),
        })
    }

    fn reaper(&self) -> Arc<CtrReaper> {
        Arc::new(CtrReaper {
            ctr: self.ctr.clone(),
            teardown_timeout: self.teardown_timeout,
            stop_wait: self.stop_wait,
        })
    }

    /// Start a detached helper container; `run_flags` go before the image.
    async fn start_helper(
        &self,
        kind: &str,
        target: &Container,
        helper: &HelperImage,
        run_flags: Vec<String>,
        command: &[String],
    ) -> Result<HelperGuard, RuntimeError> {
        if helper.pull {
            info!(image = %helper.image, "pulling helper image");
            self.ctr_ok(args(&["images", "pull", &helper.image])).await?;
        }
        let helper_id = format!("havoc-{kind}-{}", uuid::Uuid::new_v4().as_simple());
        let mut cmd = args(&["run", "-d"]);
        cmd.extend(run_flags);
        cmd.extend(args(&["--label", &format!("{SKIP_LABEL}=true")]));
        cmd.extend([helper.image.clone(), helper_id.clone()]);
        cmd.extend(command.iter().cloned());

        // Armed before `run` so a half-created helper is still cleaned up
        let guard = HelperGuard::new(helper_id.clone(), target.id(), self.reaper());
        debug!(helper = %helper_id, container = %target, image = %helper.image, "starting helper");
        if let Err(e) = self.ctr_ok(cmd).await {
            if let Err(cleanup) = guard.release().await {
                debug!(helper = %helper_id, error = %cleanup, "cleanup of failed helper");
            }
            return Err(RuntimeError::HelperFailed {
                helper: helper_id,
                reason: e.to_string(),
            });
        }
        Ok(guard)
    }

    /// Signal the task and wait for it to exit, escalating to SIGKILL.
    async fn terminate(
        &self,
        target: &Container,
        signal: &Signal,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.kill(target, signal).await?;
        let ctr = self.ctr.as_ref();
        if wait_task_exit(ctr, target.id(), timeout).await? {
            return Ok(());
        }
        warn!(container = %target, signal = %signal, "container ignored stop signal, sending SIGKILL");
        self.kill(target, &Signal::KILL).await?;
        if wait_task_exit(ctr, target.id(), self.stop_wait).await? {
            return Ok(());
        }
        Err(RuntimeError::Timeout {
            operation: format!("waiting for {} to stop", target.normalized_name()),
            after: timeout + self.stop_wait,
        })
    }
}

struct CtrReaper {
    ctr: Arc<dyn CtrExec>,
    teardown_timeout: Duration,
    stop_wait: Duration,
}

#[async_trait]
impl HelperReaper for CtrReaper {
    async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError> {
        let ctr = self.ctr.as_ref();

        // An unreadable task table leaves the state unknown, so the kill is still tried
        let state = match task_table(ctr).await {
            Ok(tasks) => tasks.get(helper_id).map(|task| task.state),
            Err(e) => {
                debug!(helper = helper_id, error = %e, "cannot read helper task");
                Some(ContainerState::Unknown)
            }
        };
        let exited_early = state == Some(ContainerState::Exited);

        // The task may already be gone; only the container delete must succeed
        if state.is_some() && !exited_early {
            let term = ctr.run(&args(&["tasks", "kill", helper_id])).await?;
            if term.success() && !wait_task_exit(ctr, helper_id, self.teardown_timeout).await? {
                warn!(helper = helper_id, "helper ignored SIGTERM, sending SIGKILL");
                ctr.run(&args(&["tasks", "kill", "-s", "SIGKILL", helper_id]))
                    .await?;
                if !wait_task_exit(ctr, helper_id, self.stop_wait).await? {
                    warn!(helper = helper_id, "helper still running after SIGKILL");
                }
            }
        }

        // `tasks delete` exits with the task's own exit status
        let deleted = ctr.run(&args(&["tasks", "delete", helper_id])).await?;
        let failure = if deleted.success() {
            None
        } else if exited_early {
            let stderr = deleted.stderr.trim();
            Some(RuntimeError::HelperFailed {
                helper: helper_id.to_string(),
                reason: if stderr.is_empty() {
                    format!("exited with status {}", deleted.status)
                } else {
                    format!("exited with status {}: {stderr}", deleted.status)
                },
            })
        } else {
            debug!(helper = helper_id, stderr = %deleted.stderr.trim(), "task delete");
            None
        };
        ctr_ok(ctr, args(&["containers", "delete", helper_id])).await?;
        debug!(helper = helper_id, "helper removed");
        failure.map_or(Ok(()), Err)
    }

    async fn wait_exit(&self, helper_id: &str) -> Result<(), RuntimeError> {
        while is_live(task_table(self.ctr.as_ref()).await?.get(helper_id)) {
            tokio::time::sleep(WATCH_INTERVAL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Runtime for ContainerdRuntime {
    fn engine(&self) -> Engine {
        Engine::Containerd
    }

    async fn list_containers(&self, opts: &ListOptions) -> Result<Vec<Container>, RuntimeError> {
        let ids = parse_ids(&self.ctr_ok(args(&["containers", "ls", "-q"])).await?);
        let tasks = task_table(self.ctr.as_ref()).await?;

        let mut containers = Vec::with_capacity(ids.len());
        for id in ids {
            // Containers may disappear between `ls` and `info`
            let info = match self.info(&id).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(container = %id, error = %e, "skipping container");
                    continue;
                }
            };
            let container = info.into_container(tasks.get(&id));
            if !opts.all && container.state() != ContainerState::Running {
                continue;
            }
            let matches = opts
                .matches_labels(&container)
                .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            if matches {
                containers.push(container);
            }
        }
        Ok(containers)
    }

    async fn exec_in_container(
        &self,
        target: &Container,
        command: &[String],
        _privileged: bool,
    ) -> Result<ExecOutput, RuntimeError> {
        self.exec_in(target.id(), command).await
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

        let task = self.live_task(target).await?;
        let flags = args(&[
            "--with-ns",
            &format!("network:/proc/{}/ns/net", task.pid),
            "--cap-add",
            "CAP_NET_ADMIN",
            "--cap-add",
            "CAP_NET_RAW",
        ]);
        let guard = self
            .start_helper("net", target, helper, flags, &args(&SIDECAR_COMMAND))
            .await?;
        let helper_id = guard.id().to_string();

        let result = run_sequence(target.normalized_name(), tool, commands, |cmd| {
            let helper_id = helper_id.clone();
            async move { self.exec_in(&helper_id, &cmd).await }
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
        self.live_task(target).await?;
        let info = self.info(target.id()).await?;
        let Some(cgroup) = info.cgroups_path() else {
            return Err(RuntimeError::Engine(format!(
                "container {} has no cgroup path",
                target.normalized_name()
            )));
        };
        let flags = args(&["--cgroup", cgroup]);
        self.start_helper("stress", target, helper, flags, command)
            .await
    }

    async fn kill(&self, target: &Container, signal: &Signal) -> Result<(), RuntimeError> {
        info!(container = %target, signal = %signal, "kill");
        self.ctr_ok(args(&["tasks", "kill", "-s", signal.name(), target.id()]))
            .await?;
        Ok(())
    }

    async fn stop(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(container = %target, ?timeout, "stop");
        let signal = label_stop_signal(target).unwrap_or(Signal::TERM);
        self.terminate(target, &signal, timeout).await?;
        // A stopped task must be deleted before the container can start again
        self.ctr_ok(args(&["tasks", "delete", target.id()])).await?;
        Ok(())
    }

    async fn start(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "start");
        self.ctr_ok(args(&["tasks", "start", "-d", target.id()]))
            .await?;
        Ok(())
    }

    async fn pause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "pause");
        self.ctr_ok(args(&["tasks", "pause", target.id()])).await?;
        Ok(())
    }

    async fn unpause(&self, target: &Container) -> Result<(), RuntimeError> {
        info!(container = %target, "unpause");
        self.ctr_ok(args(&["tasks", "resume", target.id()])).await?;
        Ok(())
    }

    async fn restart(&self, target: &Container, timeout: Duration) -> Result<(), RuntimeError> {
        info!(container = %target, ?timeout, "restart");
        if task_table(self.ctr.as_ref()).await?.contains_key(target.id()) {
            self.stop(target, timeout).await?;
        }
        self.start(target).await
    }

    async fn remove(&self, target: &Container, opts: RemoveOptions) -> Result<(), RuntimeError> {
        info!(container = %target, force = opts.force, "remove");
        if opts.links || opts.volumes {
            debug!(container = %target, "containerd has no links or anonymous volumes, ignoring");
        }
        if let Some(task) = task_table(self.ctr.as_ref()).await?.get(target.id()) {
            let live = matches!(task.state, ContainerState::Running | ContainerState::Paused);
            if live && !opts.force {
                return Err(RuntimeError::Engine(format!(
                    "container {} is running, remove with force",
                    target.normalized_name()
                )));
            }
            if live {
                self.terminate(target, &Signal::KILL, self.stop_wait).await?;
            }
            self.ctr_ok(args(&["tasks", "delete", target.id()])).await?;
        }
        self.ctr_ok(args(&["containers", "delete", target.id()]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&[String]) -> CtrOutput + Send + Sync>;

    /// Scripted `ctr`: records every command line, answers via a handler.
    struct FakeCtr {
        calls: Mutex<Vec<String>>,
        handler: Handler,
    }

    impl FakeCtr {
        fn new(handler: impl Fn(&[String]) -> CtrOutput + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_starting(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.starts_with(prefix))
                .collect()
        }
    }

    #[async_trait]
    impl CtrExec for FakeCtr {
        async fn run(&self, args: &[String]) -> Result<CtrOutput, RuntimeError> {
            self.calls.lock().unwrap().push(args.join(" "));
            Ok((self.handler)(args))
        }
    }

    fn runtime(ctr: Arc<FakeCtr>) -> ContainerdRuntime {
        ContainerdRuntime::new(ctr, Duration::from_secs(10), Duration::from_secs(5))
    }

    fn target() -> Container {
        Container::builder("web").name("web").build()
    }

    fn info_json(id: &str, name: &str, app: &str) -> String {
        format!(
            r#"{{"ID":"{id}","Image":"docker.io/library/nginx:latest","Labels":{{"nerdctl/name":"{name}","app":"{app}"}},"Spec":{{"linux":{{"cgroupsPath":"/k8s.io/{id}"}}}}}}"#
        )
    }

    /// Cluster of three containers: web (running), db (paused), old (no task).
    fn cluster(args: &[String]) -> CtrOutput {
        let line = args.join(" ");
        match line.as_str() {
            "containers ls -q" => CtrOutput::ok("web\ndb\nold\n"),
            "tasks ls" => CtrOutput::ok(
                "TASK    PID     STATUS\nweb     100     RUNNING\ndb      200     PAUSED\n",
            ),
            "containers info web" => CtrOutput::ok(info_json("web", "web-1", "web")),
            "containers info db" => CtrOutput::ok(info_json("db", "db-1", "db")),
            "containers info old" => CtrOutput::ok(info_json("old", "old-1", "web")),
            _ => CtrOutput::ok(""),
        }
    }

    #[tokio::test]
    async fn lists_running_by_default() {
        let ctr = FakeCtr::new(cluster);
        let rt = runtime(ctr.clone());

        let running = rt.list_containers(&ListOptions::default()).await.unwrap();
        let names: Vec<&str> = running.iter().map(Container::name).collect();
        assert_eq!(names, vec!["web-1"]);

        let all_web = rt
            .list_containers(&ListOptions {
                all: true,
                labels: vec!["app=web".into()],
            })
            .await
            .unwrap();
        let ids: Vec<&str> = all_web.iter().map(Container::id).collect();
        assert_eq!(ids, vec!["web", "old"]);
        assert_eq!(all_web[1].state(), ContainerState::Exited);
        assert_eq!(rt.engine(), Engine::Containerd);
    }

    #[tokio::test]
    async fn listing_skips_vanished_containers() {
        let ctr = FakeCtr::new(|args| {
            if args.join(" ") == "containers info db" {
                return CtrOutput::failed(1, "not found");
            }
            cluster(args)
        });
        let all = runtime(ctr)
            .list_containers(&ListOptions {
                all: true,
                labels: vec![],
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn listing_fails_when_ctr_fails() {
        let ctr = FakeCtr::new(|_| CtrOutput::failed(1, "connection refused"));
        let err = runtime(ctr)
            .list_containers(&ListOptions::default())
            .await
            .unwrap_err();
        match err {
            RuntimeError::Ctr {
                command, stderr, ..
            } => {
                assert_eq!(command, "containers ls -q");
                assert_eq!(stderr, "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn direct_exec_checks_tool_first() {
        let ctr = FakeCtr::new(|args| {
            if args.ends_with(&["which".to_string(), "tc".to_string()]) {
                return CtrOutput::failed(1, "");
            }
            CtrOutput::ok("")
        });
        let err = runtime(ctr.clone())
            .exec_in_network_context(&target(), None, "tc", &[args(&["qdisc", "show"])])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandNotFound { .. }));

        let execs = ctr.calls_starting("tasks exec");
        assert_eq!(execs.len(), 1);
        assert!(execs[0].contains("--exec-id havoc-exec-"));
        assert!(execs[0].ends_with("web which tc"));
    }

    #[tokio::test(start_paused = true)]
    async fn sidecar_joins_target_netns_and_is_removed() {
        let ctr = FakeCtr::new(|args| match args.join(" ").as_str() {
            "tasks ls" => CtrOutput::ok("TASK PID STATUS\nweb 100 RUNNING\n"),
            _ => CtrOutput::ok(""),
        });
        let helper = HelperImage::new("docker.io/nicolaka/netshoot:latest");
        runtime(ctr.clone())
            .exec_in_network_context(
                &target(),
                Some(&helper),
                "tc",
                &[args(&["qdisc", "add"]), args(&["filter", "add"])],
            )
            .await
            .unwrap();

        let run = ctr.calls_starting("run -d");
        assert_eq!(run.len(), 1);
        assert!(run[0].starts_with(
            "run -d --with-ns network:/proc/100/ns/net --cap-add CAP_NET_ADMIN --cap-add CAP_NET_RAW --label io.havoc.skip=true docker.io/nicolaka/netshoot:latest havoc-net-"
        ));
        assert!(run[0].ends_with(" sleep 300"));

        let execs = ctr.calls_starting("tasks exec");
        assert_eq!(execs.len(), 2);
        assert!(execs[0].ends_with("tc qdisc add"));
        assert!(execs[1].ends_with("tc filter add"));

        let deletes = ctr.calls_starting("containers delete havoc-net-");
        assert_eq!(deletes.len(), 1);
        // No pull unless requested
        assert!(ctr.calls_starting("images pull").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sidecar_is_removed_after_failing_command() {
        let ctr = FakeCtr::new(|args| {
            let line = args.join(" ");
            if line == "tasks ls" {
                return CtrOutput::ok("TASK PID STATUS\nweb 100 RUNNING\n");
            }
            if line.starts_with("tasks exec") && line.ends_with("tc bad") {
                return CtrOutput::failed(2, "Error: invalid argument");
            }
            CtrOutput::ok("")
        });
        let helper = HelperImage {
            image: "netshoot".into(),
            pull: true,
        };
        let err = runtime(ctr.clone())
            .exec_in_network_context(
                &target(),
                Some(&helper),
                "tc",
                &[args(&["ok"]), args(&["bad"]), args(&["never"])],
            )
            .await
            .unwrap_err();

        match err {
            RuntimeError::CommandFailed {
                index, exit_code, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(exit_code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctr.calls_starting("images pull netshoot").len(), 1);
        assert_eq!(ctr.calls_starting("tasks exec").len(), 2);
        assert_eq!(ctr.calls_starting("containers delete havoc-net-").len(), 1);
    }

    #[tokio::test]
    async fn sidecar_requires_live_task() {
        let ctr = FakeCtr::new(|args| match args.join(" ").as_str() {
            "tasks ls" => CtrOutput::ok("TASK PID STATUS\nweb 100 STOPPED\n"),
            _ => CtrOutput::ok(""),
        });
        let err = runtime(ctr.clone())
            .exec_in_network_context(&target(), Some(&HelperImage::new("img")), "tc", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NotRunning { .. }));
        assert!(ctr.calls_starting("run").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_helper_gets_sigkill() {
        let killed = Arc::new(AtomicBool::new(false));
        let flag = killed.clone();
        let ctr = FakeCtr::new(move |args| {
            let line = args.join(" ");
            if line == "tasks ls" {
                if flag.load(Ordering::SeqCst) {
                    return CtrOutput::ok("TASK PID STATUS\n");
                }
                return CtrOutput::ok("TASK PID STATUS\nh1 300 RUNNING\n");
            }
            if line == "tasks kill -s SIGKILL h1" {
                flag.store(true, Ordering::SeqCst);
            }
            CtrOutput::ok("")
        });
        let reaper = CtrReaper {
            ctr: ctr.clone(),
            teardown_timeout: Duration::from_secs(2),
            stop_wait: Duration::from_secs(1),
        };

        let started = Instant::now();
        reaper.reap("h1").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));

        let kills = ctr.calls_starting("tasks kill");
        assert_eq!(kills, vec!["tasks kill h1", "tasks kill -s SIGKILL h1"]);
        assert_eq!(ctr.calls_starting("tasks delete h1").len(), 1);
        assert_eq!(ctr.calls_starting("containers delete h1").len(), 1);
    }

    #[tokio::test]
    async fn reap_survives_failing_task_commands() {
        let ctr = FakeCtr::new(|args| {
            if args[0] == "tasks" {
                return CtrOutput::failed(1, "no such task");
            }
            CtrOutput::ok("")
        });
        let reaper = CtrReaper {
            ctr: ctr.clone(),
            teardown_timeout: Duration::from_secs(2),
            stop_wait: Duration::from_secs(1),
        };
        reaper.reap("h1").await.unwrap();
        assert_eq!(
            ctr.calls(),
            vec![
                "tasks ls",
                "tasks kill h1",
                "tasks delete h1",
                "containers delete h1"
            ]
        );
    }

    /// Cluster where every stress helper's task has already stopped and
    /// reports exit status 1 when deleted.
    fn failing_stress(helper: &Mutex<Option<String>>, args: &[String]) -> CtrOutput {
        let line = args.join(" ");
        if args[0] == "run" {
            let id = args.iter().find(|a| a.starts_with("havoc-stress-")).cloned();
            *helper.lock().unwrap() = id;
            return CtrOutput::ok("");
        }
        let Some(id) = helper.lock().unwrap().clone() else {
            return cluster(args);
        };
        if line == "tasks ls" {
            return CtrOutput::ok(format!(
                "TASK PID STATUS\nweb 100 RUNNING\n{id} 300 STOPPED\n"
            ));
        }
        if line == format!("tasks delete {id}") {
            return CtrOutput::failed(1, "");
        }
        cluster(args)
    }

    #[tokio::test]
    async fn failed_stress_helper_surfaces_on_release() {
        let helper = Arc::new(Mutex::new(None));
        let seen = helper.clone();
        let ctr = FakeCtr::new(move |args| failing_stress(&seen, args));
        let rt = runtime(ctr.clone());

        let guard = rt
            .exec_in_cgroup_context(
                &target(),
                &HelperImage::new("stress"),
                &args(&["stress-ng", "--cpux", "2"]),
            )
            .await
            .unwrap();
        let id = guard.id().to_string();

        let err = rt.release_helper(guard).await.unwrap_err();
        match err {
            RuntimeError::HelperFailed { helper, reason } => {
                assert_eq!(helper, id);
                assert!(reason.contains("status 1"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Already stopped: never signalled, still removed
        assert!(ctr.calls_starting(&format!("tasks kill {id}")).is_empty());
        assert_eq!(
            ctr.calls_starting(&format!("containers delete {id}")).len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn helper_watch_ends_when_task_stops() {
        let polls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = polls.clone();
        let ctr = FakeCtr::new(move |args| {
            if args.join(" ") == "tasks ls" {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    return CtrOutput::ok("TASK PID STATUS\nh1 300 RUNNING\n");
                }
                return CtrOutput::ok("TASK PID STATUS\nh1 300 STOPPED\n");
            }
            CtrOutput::ok("")
        });
        let guard = HelperGuard::new(
            "h1",
            "web",
            Arc::new(CtrReaper {
                ctr: ctr.clone(),
                teardown_timeout: Duration::from_secs(2),
                stop_wait: Duration::from_secs(1),
            }),
        );

        let watched = tokio::time::timeout(Duration::from_secs(60), guard.exited()).await;
        assert!(watched.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 4);

        // Clean exit: delete succeeds, release is quiet
        guard.release().await.unwrap();
        assert!(ctr.calls_starting("tasks kill").is_empty());
        assert_eq!(ctr.calls_starting("containers delete h1").len(), 1);
    }

    #[tokio::test]
    async fn stress_helper_joins_target_cgroup() {
        let ctr = FakeCtr::new(cluster);
        let rt = runtime(ctr.clone());
        let guard = rt
            .exec_in_cgroup_context(
                &target(),
                &HelperImage::new("stress"),
                &args(&["stress-ng", "--cpu", "2"]),
            )
            .await
            .unwrap();
        assert!(guard.id().starts_with("havoc-stress-"));
        assert_eq!(guard.target(), "web");

        let run = ctr.calls_starting("run -d");
        assert_eq!(run.len(), 1);
        assert!(run[0].starts_with("run -d --cgroup /k8s.io/web --label io.havoc.skip=true stress havoc-stress-"));
        assert!(run[0].ends_with(" stress-ng --cpu 2"));

        let id = guard.id().to_string();
        rt.release_helper(guard).await.unwrap();
        assert_eq!(
            ctr.calls_starting(&format!("containers delete {id}")).len(),
            1
        );
    }

    #[tokio::test]
    async fn failed_helper_start_is_cleaned_up() {
        let ctr = FakeCtr::new(|args| {
            if args[0] == "run" {
                return CtrOutput::failed(1, "image not found");
            }
            cluster(args)
        });
        let err = runtime(ctr.clone())
            .exec_in_cgroup_context(&target(), &HelperImage::new("nope"), &args(&["stress-ng"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::HelperFailed { .. }));
        assert_eq!(ctr.calls_starting("containers delete havoc-stress-").len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_commands() {
        let ctr = FakeCtr::new(|_| CtrOutput::ok(""));
        let rt = runtime(ctr.clone());
        let t = target();

        rt.kill(&t, &"SIGHUP".parse().unwrap()).await.unwrap();
        rt.pause(&t).await.unwrap();
        rt.unpause(&t).await.unwrap();
        rt.start(&t).await.unwrap();

        assert_eq!(
            ctr.calls(),
            vec![
                "tasks kill -s SIGHUP web",
                "tasks pause web",
                "tasks resume web",
                "tasks start -d web",
            ]
        );
    }

    #[tokio::test]
    async fn stop_uses_label_signal_and_deletes_task() {
        let ctr = FakeCtr::new(|_| CtrOutput::ok(""));
        let t = Container::builder("web")
            .label(havoc_types::STOP_SIGNAL_LABEL, "SIGINT")
            .build();
        runtime(ctr.clone())
            .stop(&t, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(
            ctr.calls(),
            vec!["tasks kill -s SIGINT web", "tasks ls", "tasks delete web"]
        );
    }

    #[tokio::test]
    async fn invalid_stop_signal_label_falls_back_to_term() {
        let ctr = FakeCtr::new(|_| CtrOutput::ok(""));
        let t = Container::builder("web")
            .label(havoc_types::STOP_SIGNAL_LABEL, "SIGBOGUS")
            .build();
        runtime(ctr.clone())
            .stop(&t, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(ctr.calls()[0], "tasks kill -s SIGTERM web");
    }

    #[tokio::test]
    async fn remove_running_requires_force() {
        let ctr = FakeCtr::new(cluster);
        let rt = runtime(ctr.clone());
        let err = rt
            .remove(&target(), RemoveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Engine(_)));
        assert!(ctr.calls_starting("containers delete").is_empty());

        let old = Container::builder("old").build();
        rt.remove(&old, RemoveOptions::default()).await.unwrap();
        assert_eq!(ctr.calls_starting("containers delete old").len(), 1);
    }
}
