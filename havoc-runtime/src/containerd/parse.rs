//! Parsing of `ctr` output (pure, no I/O).

use havoc_types::{Container, ContainerState};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::RuntimeError;

/// Labels that may carry a human-readable container name, in priority order.
pub const NAME_LABELS: [&str; 3] = ["nerdctl/name", "io.kubernetes.container.name", "name"];

/// A row of `ctr tasks ls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    /// Host PID of the task's init process.
    pub pid: u32,
    /// Task status.
    pub state: ContainerState,
}

/// Parse the `ctr tasks ls` table.
///
/// ```text
/// TASK     PID      STATUS
/// web-1    4242     RUNNING
/// ```
pub fn parse_tasks(output: &str) -> Result<HashMap<String, TaskInfo>, RuntimeError> {
    let mut tasks = HashMap::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("TASK") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(id), Some(pid), Some(status)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(RuntimeError::Engine(format!("malformed tasks line: {line:?}")));
        };
        let pid = pid
            .parse()
            .map_err(|_| RuntimeError::Engine(format!("bad pid in tasks line: {line:?}")))?;
        tasks.insert(
            id.to_string(),
            TaskInfo {
                pid,
                state: ContainerState::from_engine(status),
            },
        );
    }
    Ok(tasks)
}

/// Parse `ctr containers ls -q` into container IDs.
pub fn parse_ids(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// The parts of `ctr containers info` we use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInfo {
    /// Container ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Image reference.
    #[serde(rename = "Image", default)]
    pub image: String,
    /// Labels.
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
    /// OCI runtime spec.
    #[serde(rename = "Spec", default)]
    pub spec: Option<OciSpec>,
}

/// OCI runtime spec subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OciSpec {
    /// Linux-specific section.
    #[serde(default)]
    pub linux: Option<OciLinux>,
}

/// OCI Linux section subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OciLinux {
    /// Cgroup path of the container.
    #[serde(rename = "cgroupsPath", default)]
    pub cgroups_path: Option<String>,
}

impl ContainerInfo {
    /// Parse `ctr containers info` JSON.
    pub fn parse(json: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(json)
            .map_err(|e| RuntimeError::Engine(format!("bad containers info output: {e}")))
    }

    /// Cgroup path, if the OCI runtime section has one.
    pub fn cgroups_path(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.linux.as_ref())
            .and_then(|l| l.cgroups_path.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Build a container snapshot, taking state from the task table.
    ///
    /// Containers without a task are reported as exited.
    pub fn into_container(self, task: Option<&TaskInfo>) -> Container {
        let labels = self.labels.unwrap_or_default();
        let name = NAME_LABELS
            .iter()
            .find_map(|key| labels.get(*key).filter(|v| !v.is_empty()).cloned())
            .unwrap_or_else(|| self.id.clone());
        let state = task.map(|t| t.state).unwrap_or(ContainerState::Exited);
        Container::builder(self.id)
            .name(name)
            .image(self.image)
            .state(state)
            .labels(labels)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS: &str = "\
TASK                                                                PID      STATUS
web-1                                                               4242     RUNNING
db                                                                  77       PAUSED
old                                                                 0        STOPPED
";

    #[test]
    fn tasks_table() {
        let tasks = parse_tasks(TASKS).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(
            tasks["web-1"],
            TaskInfo {
                pid: 4242,
                state: ContainerState::Running
            }
        );
        assert_eq!(tasks["db"].state, ContainerState::Paused);
        assert_eq!(tasks["old"].state, ContainerState::Exited);
    }

    #[test]
    fn empty_tasks_table() {
        assert!(parse_tasks("TASK    PID    STATUS\n").unwrap().is_empty());
        assert!(parse_tasks("").unwrap().is_empty());
    }

    #[test]
    fn malformed_tasks_line() {
        assert!(parse_tasks("web-1 4242\n").is_err());
        assert!(parse_tasks("web-1 pid RUNNING\n").is_err());
    }

    #[test]
    fn ids_skip_blank_lines() {
        assert_eq!(parse_ids("a\n\n b \n"), vec!["a", "b"]);
    }

    #[test]
    fn info_to_container() {
        let json = r#"{
            "ID": "abc",
            "Image": "docker.io/library/nginx:1.25",
            "Labels": {"nerdctl/name": "web-1", "name": "ignored", "app": "web"},
            "Spec": {"ociVersion": "1.1.0", "linux": {"cgroupsPath": "/default/abc"}}
        }"#;
        let info = ContainerInfo::parse(json).unwrap();
        assert_eq!(info.cgroups_path(), Some("/default/abc"));

        let task = TaskInfo {
            pid: 1,
            state: ContainerState::Running,
        };
        let c = info.into_container(Some(&task));
        assert_eq!(c.id(), "abc");
        assert_eq!(c.name(), "web-1");
        assert_eq!(c.image(), "docker.io/library/nginx:1.25");
        assert_eq!(c.state(), ContainerState::Running);
        assert_eq!(c.label("app"), Some("web"));
    }

    #[test]
    fn name_falls_back_to_kubernetes_label_then_id() {
        let info = ContainerInfo::parse(
            r#"{"ID": "abc", "Labels": {"io.kubernetes.container.name": "api"}}"#,
        )
        .unwrap();
        assert_eq!(info.into_container(None).name(), "api");

        let info = ContainerInfo::parse(r#"{"ID": "abc", "Labels": null}"#).unwrap();
        assert_eq!(info.cgroups_path(), None);
        let c = info.into_container(None);
        assert_eq!(c.name(), "abc");
        assert_eq!(c.state(), ContainerState::Exited);
    }

    #[test]
    fn bad_info_json() {
        assert!(matches!(
            ContainerInfo::parse("not json"),
            Err(RuntimeError::Engine(_))
        ));
    }
}
