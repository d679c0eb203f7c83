//! `stress-ng` resource stress parameters.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default helper image carrying `stress-ng` and the cgroup exec shim.
pub const DEFAULT_STRESS_IMAGE: &str = "ghcr.io/alexei-led/stress-ng:latest";

/// Executable run inside the target's cgroup.
pub const STRESS_NG: &str = "stress-ng";

/// A validated stress disruption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressSpec {
    stressors: Vec<String>,
    #[serde(default = "default_image")]
    image: String,
    #[serde(default)]
    pull: bool,
}

fn default_image() -> String {
    DEFAULT_STRESS_IMAGE.to_string()
}

impl StressSpec {
    /// Build from a whitespace-separated stressor string, e.g. `--cpu 2 --timeout 60s`.
    pub fn new(stressors: &str, image: Option<String>, pull: bool) -> Result<Self, ValidationError> {
        let spec = Self {
            stressors: stressors.split_whitespace().map(String::from).collect(),
            image: image
                .filter(|i| !i.trim().is_empty())
                .unwrap_or_else(default_image),
            pull,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Re-check parameters (used after deserialization).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stressors.is_empty() {
            return Err(ValidationError::NoStressors);
        }
        Ok(())
    }

    /// Stressor arguments.
    pub fn stressors(&self) -> &[String] {
        &self.stressors
    }

    /// Helper image.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Pull the helper image before use.
    pub fn pull(&self) -> bool {
        self.pull
    }

    /// Command run in the target's cgroup: `stress-ng <stressors...>`.
    pub fn command(&self) -> Vec<String> {
        std::iter::once(STRESS_NG.to_string())
            .chain(self.stressors.iter().cloned())
            .collect()
    }
}
