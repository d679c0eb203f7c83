//! Container lifecycle faults: pause, kill, stop, rm and restart.

use clap::Args;
use havoc_core::{Disruption, Signal};
use std::time::Duration;

use super::{Invocation, TargetArgs};

/// `havoc pause`
#[derive(Args, Debug)]
pub struct PauseArgs {
    /// How long to keep the containers paused, e.g. 30s
    #[arg(long, short, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl PauseArgs {
    /// Build the invocation.
    pub fn invocation(self) -> Invocation {
        Invocation {
            targets: self.targets,
            disruption: Disruption::Pause,
            duration: self.duration,
        }
    }
}

/// `havoc kill`
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Signal sent to the main process: name (SIGTERM, TERM) or number
    #[arg(long, short, default_value = "SIGKILL")]
    pub signal: Signal,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl KillArgs {
    /// Build the invocation.
    pub fn invocation(self) -> Invocation {
        Invocation {
            targets: self.targets,
            disruption: Disruption::Kill {
                signal: self.signal,
            },
            duration: None,
        }
    }
}

/// `havoc stop`
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Grace period before the container is killed
    #[arg(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
    pub timeout: Duration,

    /// Start the container again after --duration
    #[arg(long, short)]
    pub restart: bool,

    /// How long to keep the container stopped (with --restart)
    #[arg(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
    pub duration: Duration,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl StopArgs {
    /// Build the invocation. The duration only applies with `--restart`.
    pub fn invocation(self) -> Invocation {
        Invocation {
            targets: self.targets,
            disruption: Disruption::Stop {
                timeout: self.timeout,
                restart: self.restart,
            },
            duration: self.restart.then_some(self.duration),
        }
    }
}

/// `havoc rm`
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Kill a running container before removing it
    #[arg(long, short)]
    pub force: bool,

    /// Remove container links
    #[arg(long = "links", short = 'n')]
    pub links: bool,

    /// Remove volumes associated with the container
    #[arg(long, short)]
    pub volumes: bool,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl RemoveArgs {
    /// Build the invocation.
    pub fn invocation(self) -> Invocation {
        Invocation {
            targets: self.targets,
            disruption: Disruption::Remove {
                force: self.force,
                links: self.links,
                volumes: self.volumes,
            },
            duration: None,
        }
    }
}

/// `havoc restart`
#[derive(Args, Debug)]
pub struct RestartArgs {
    /// Grace period before the container is killed
    #[arg(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
    pub timeout: Duration,

    #[command(flatten)]
    pub targets: TargetArgs,
}

impl RestartArgs {
    /// Build the invocation.
    pub fn invocation(self) -> Invocation {
        Invocation {
            targets: self.targets,
            disruption: Disruption::Restart {
                timeout: self.timeout,
            },
            duration: None,
        }
    }
}
