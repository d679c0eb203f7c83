//! Docker API payloads (pure, no I/O).

use bollard::container::Config;
use bollard::models::{ContainerState as DockerState, ContainerSummary, HostConfig};
use havoc_types::{Container, ContainerState, ListOptions, SKIP_LABEL};
use std::collections::{BTreeMap, HashMap};

/// Entrypoint that keeps a network helper alive until it is removed.
pub const IDLE_ENTRYPOINT: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Entrypoint that runs a command inside another container's cgroup.
pub const CGROUP_EXEC_ENTRYPOINT: [&str; 2] = ["dockhack", "cg_exec"];

fn skip_labels() -> HashMap<String, String> {
    HashMap::from([(SKIP_LABEL.to_string(), "true".to_string())])
}

/// Server-side list filters for label selectors.
///
/// Without `all`, only running containers are listed; paused ones are left
/// out, as they are on containerd.
pub fn list_filters(opts: &ListOptions) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    if !opts.all {
        filters.insert("status".to_string(), vec!["running".to_string()]);
    }
    if !opts.labels.is_empty() {
        filters.insert("label".to_string(), opts.labels.clone());
    }
    filters
}

/// Helper sharing the target's network namespace with `NET_ADMIN`.
pub fn network_helper_config(target_id: &str, image: &str) -> Config<String> {
    Config {
        image: Some(image.to_string()),
        entrypoint: Some(IDLE_ENTRYPOINT.iter().map(|s| s.to_string()).collect()),
        labels: Some(skip_labels()),
        host_config: Some(HostConfig {
            network_mode: Some(format!("container:{target_id}")),
            cap_add: Some(vec!["NET_ADMIN".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper running `command` inside the target's cgroup.
pub fn cgroup_helper_config(target_id: &str, image: &str, command: &[String]) -> Config<String> {
    let cmd = std::iter::once(target_id.to_string())
        .chain(command.iter().cloned())
        .collect();
    Config {
        image: Some(image.to_string()),
        entrypoint: Some(
            CGROUP_EXEC_ENTRYPOINT
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        cmd: Some(cmd),
        labels: Some(skip_labels()),
        host_config: Some(HostConfig {
            cap_add: Some(vec!["SYS_ADMIN".to_string()]),
            security_opt: Some(vec!["apparmor:unconfined".to_string()]),
            binds: Some(vec![
                "/var/run/docker.sock:/var/run/docker.sock".to_string(),
                "/sys/fs/cgroup:/sys/fs/cgroup".to_string(),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Exit code of a helper that stopped on its own with a failure.
///
/// `None` while the helper still runs, when it exited cleanly, or when the
/// engine reports no state.
pub fn failed_exit_code(state: Option<&DockerState>) -> Option<i64> {
    let state = state?;
    if state.running.unwrap_or(false) {
        return None;
    }
    state.exit_code.filter(|code| *code != 0)
}

/// Convert a list entry into a container snapshot.
pub fn container_from_summary(summary: ContainerSummary) -> Container {
    let id = summary.id.unwrap_or_default();
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .unwrap_or_else(|| id.clone());
    let state = summary
        .state
        .as_deref()
        .map(ContainerState::from_engine)
        .unwrap_or(ContainerState::Unknown);
    let labels: BTreeMap<String, String> = summary.labels.unwrap_or_default().into_iter().collect();

    let mut builder = Container::builder(id)
        .name(name)
        .image(summary.image.unwrap_or_default())
        .state(state)
        .labels(labels);

    let networks = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default();
    for (network, endpoint) in networks {
        builder = builder.network(network, endpoint.links.unwrap_or_default());
    }
    builder.build()
}
