//! `havoc exec`: run a command inside the targets.

use clap::Args;
use havoc_core::Disruption;

use super::{Invocation, TargetArgs};

/// Exec flags.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command line to run, split on whitespace
    #[arg(long, short = 's', default_value = "kill 1")]
    pub command: String,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl ExecArgs {
    /// Build the invocation. An empty command fails plan validation.
    pub fn invocation(self) -> Invocation {
        let mut words = self.command.split_whitespace().map(String::from);
        let disruption = match words.next() {
            Some(command) => Disruption::Exec {
                command,
                args: words.collect(),
            },
            None => Disruption::Exec {
                command: String::new(),
                args: Vec::new(),
            },
        };
        Invocation {
            targets: self.targets,
            disruption,
            duration: None,
        }
    }
}
