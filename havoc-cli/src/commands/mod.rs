//! Subcommand argument parsing.
//!
//! Every subcommand turns its flags into an [`Invocation`]: the disruption,
//! its hold duration and the positional targets. Validation happens here,
//! before any engine is contacted.

use clap::Args;
use havoc_core::{
    Disruption, DisruptionPlan, HelperImage, SelectionError, SelectionPolicy, Targets,
    ValidationError,
};
use std::time::Duration;

pub mod exec;
pub mod iptables;
pub mod lifecycle;
pub mod netem;
pub mod stress;

/// Positional targets and the limit shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Containers: names, or one RE2 regex prefixed with "re2:"; none means all
    #[arg(value_name = "CONTAINERS")]
    pub containers: Vec<String>,

    /// Limit number of targets (0: all matching)
    #[arg(long, short, default_value_t = 0)]
    pub limit: usize,
}

/// A parsed subcommand.
#[derive(Debug)]
pub struct Invocation {
    /// Who to target.
    pub targets: TargetArgs,
    /// What to do to them.
    pub disruption: Disruption,
    /// How long to hold it.
    pub duration: Option<Duration>,
}

impl Invocation {
    /// Combine the positional targets with the global label and random flags.
    pub fn policy(&self, labels: &[String], random: bool) -> Result<SelectionPolicy, SelectionError> {
        SelectionPolicy::builder()
            .targets(Targets::from_args(&self.targets.containers))
            .labels(labels.to_vec())
            .limit(self.targets.limit)
            .random(random)
            .build()
    }

    /// Validate the disruption against the schedule interval.
    pub fn plan(&self, interval: Duration) -> Result<DisruptionPlan, ValidationError> {
        DisruptionPlan::new(self.disruption.clone(), self.duration, interval)
    }
}

/// Pick the helper image: the flag wins over the configured one.
pub(crate) fn helper(
    flag: Option<String>,
    pull: bool,
    configured: Option<HelperImage>,
) -> Option<HelperImage> {
    match flag {
        Some(image) => HelperImage::optional(Some(image), pull),
        None => configured.map(|h| HelperImage {
            pull: h.pull || pull,
            ..h
        }),
    }
}
