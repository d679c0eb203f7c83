//! `havoc stress`: run stress-ng inside the target's cgroup.

use anyhow::Result;
use clap::Args;
use havoc_core::{Disruption, StressSpec};
use havoc_engine::Config;
use std::time::Duration;

use super::{Invocation, TargetArgs};

/// Stress flags.
#[derive(Args, Debug)]
pub struct StressArgs {
    /// How long to stress, e.g. 30s or 5m
    #[arg(long, short, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// stress-ng stressors; use = to pass values, e.g. --stressors="--cpu 4 --timeout 60s"
    #[arg(long, default_value = "--cpu 4 --timeout 60s", allow_hyphen_values = true)]
    pub stressors: String,

    /// Image with stress-ng (default from config)
    #[arg(long)]
    pub stress_image: Option<String>,

    /// Pull the stress image before use
    #[arg(long)]
    pub pull_image: bool,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl StressArgs {
    /// Validate the flags into a stress invocation.
    pub fn invocation(self, config: &Config) -> Result<Invocation> {
        let image = self
            .stress_image
            .unwrap_or_else(|| config.helpers.stress_image.clone());
        let spec = StressSpec::new(
            &self.stressors,
            Some(image),
            self.pull_image || config.helpers.pull,
        )?;
        Ok(Invocation {
            targets: self.targets,
            disruption: Disruption::Stress(spec),
            duration: self.duration,
        })
    }
}
