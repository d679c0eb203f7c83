//! Container snapshot as reported by a container engine.
//!
//! Docker reports names with a leading `/` (inspect API) while containerd
//! has no name concept at all, so every name comparison goes through
//! [`Container::normalized_name`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ContainerError;

/// Label identifying the havoc container itself.
pub const SELF_LABEL: &str = "io.havoc";

/// Label opting a container out of every disruption. Helper containers carry it too.
pub const SKIP_LABEL: &str = "io.havoc.skip";

/// Label carrying a custom stop signal for the container.
pub const STOP_SIGNAL_LABEL: &str = "io.havoc.stop-signal";

/// Normalized container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Main process is running.
    Running,
    /// Main process is frozen (cgroup freezer).
    Paused,
    /// Container exists but its process is not running.
    Exited,
    /// Engine reported a state we do not model.
    Unknown,
}

impl ContainerState {
    /// Parse an engine state string.
    ///
    /// Accepts both Docker (`running`, `exited`, `created`, ...) and
    /// containerd task statuses (`RUNNING`, `STOPPED`, ...). Never fails.
    pub fn from_engine(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" | "restarting" => Self::Running,
            "paused" | "pausing" => Self::Paused,
            "exited" | "stopped" | "created" | "dead" | "removing" => Self::Exited,
            _ => Self::Unknown,
        }
    }

    /// Get the state as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a container.
///
/// Snapshots are re-fetched on every selection pass and never mutated in
/// place. Build them with [`Container::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    id: String,
    name: String,
    image: String,
    state: ContainerState,
    labels: BTreeMap<String, String>,
    networks: BTreeMap<String, Vec<String>>,
}

impl Container {
    /// Start building a container snapshot with the given engine ID.
    pub fn builder(id: impl Into<String>) -> ContainerBuilder {
        ContainerBuilder::new(id)
    }

    /// Engine-specific container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name exactly as reported by the engine (may start with `/`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without the leading `/` separator.
    pub fn normalized_name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }

    /// Image reference. A missing tag is reported as `latest`.
    pub fn image(&self) -> String {
        let last_segment = self.image.rsplit('/').next().unwrap_or(&self.image);
        if self.image.contains('@') || last_segment.contains(':') {
            self.image.clone()
        } else {
            format!("{}:latest", self.image)
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// All labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Look up a single label.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Networks with their link lists.
    pub fn networks(&self) -> &BTreeMap<String, Vec<String>> {
        &self.networks
    }

    /// Names of all linked containers across networks.
    ///
    /// Docker reports links as `name:alias`; only the name part is kept.
    pub fn links(&self) -> Vec<String> {
        self.networks
            .values()
            .flatten()
            .map(|link| link.split(':').next().unwrap_or(link).to_string())
            .collect()
    }

    /// True if this container is havoc itself.
    pub fn is_self(&self) -> bool {
        self.label(SELF_LABEL) == Some("true")
    }

    /// True if this container opted out of disruptions.
    pub fn is_skipped(&self) -> bool {
        self.label(SKIP_LABEL) == Some("true")
    }

    /// True if the container must never be selected.
    pub fn is_excluded(&self) -> bool {
        self.is_self() || self.is_skipped()
    }

    /// Custom stop signal from [`STOP_SIGNAL_LABEL`], if set.
    pub fn stop_signal(&self) -> Option<&str> {
        self.label(STOP_SIGNAL_LABEL).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id: String = self.id.chars().take(12).collect();
        write!(f, "{} ({})", self.normalized_name(), short_id)
    }
}

/// Builder for [`Container`] snapshots.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    inner: Container,
}

impl ContainerBuilder {
    fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            inner: Container {
                name: id.clone(),
                id,
                image: String::new(),
                state: ContainerState::Running,
                labels: BTreeMap::new(),
                networks: BTreeMap::new(),
            },
        }
    }

    /// Set the name (defaults to the ID).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.inner.image = image.into();
        self
    }

    /// Set the lifecycle state (defaults to running).
    pub fn state(mut self, state: ContainerState) -> Self {
        self.inner.state = state;
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.labels.insert(key.into(), value.into());
        self
    }

    /// Replace all labels.
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.inner.labels = labels;
        self
    }

    /// Add a network with its links.
    pub fn network(mut self, name: impl Into<String>, links: Vec<String>) -> Self {
        self.inner.networks.insert(name.into(), links);
        self
    }

    /// Finish building.
    pub fn build(self) -> Container {
        self.inner
    }
}

/// Engine-side listing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include stopped containers.
    pub all: bool,
    /// Label selectors, each `key=value` or bare `key`; AND-matched.
    pub labels: Vec<String>,
}

impl ListOptions {
    /// Listing options for running containers matching `labels`.
    pub fn running(labels: Vec<String>) -> Self {
        Self { all: false, labels }
    }

    /// Parse label selectors into `(key, Some(value))` or `(key, None)` pairs.
    pub fn label_selectors(&self) -> Result<Vec<LabelSelector>, ContainerError> {
        self.labels.iter().map(|raw| raw.parse()).collect()
    }

    /// True if the container satisfies every label selector.
    ///
    /// Used by backends that cannot filter labels server-side.
    pub fn matches_labels(&self, container: &Container) -> Result<bool, ContainerError> {
        Ok(self
            .label_selectors()?
            .iter()
            .all(|selector| selector.matches(container)))
    }
}

/// A single `key[=value]` label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    /// Label key.
    pub key: String,
    /// Required value, or `None` for presence only.
    pub value: Option<String>,
}

impl LabelSelector {
    /// True if the container carries this label (with the value, if given).
    pub fn matches(&self, container: &Container) -> bool {
        match (&self.value, container.label(&self.key)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        }
    }
}

impl FromStr for LabelSelector {
    type Err = ContainerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim().to_string())),
            None => (raw, None),
        };
        if key.is_empty() {
            return Err(ContainerError::InvalidLabel(raw.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}
