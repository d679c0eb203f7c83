//! # havoc
//!
//! Chaos testing for Docker and containerd containers.
//!
//! ## Commands
//!
//! - `netem`: delay, loss, duplicate, corrupt or rate-limit egress traffic
//! - `iptables loss`: drop ingress packets
//! - `stress`: run stress-ng in the target's cgroup
//! - `pause`, `stop`, `kill`, `rm`, `restart`, `exec`: lifecycle faults
//!
//! ## Example
//!
//! ```bash
//! # Delay traffic from every container named web-* by 300ms for a minute
//! havoc netem --duration 1m delay --time 300 re2:^web
//!
//! # Every 5 minutes, kill one random container labelled tier=front
//! havoc --interval 5m --random --label tier=front kill --signal SIGTERM
//!
//! # Same against containerd, without touching anything
//! havoc --runtime containerd --dry-run pause --duration 10s db
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use havoc_engine::{telemetry, Config};
use havoc_runtime::Engine;
use std::path::PathBuf;
use std::time::Duration;

mod commands;
mod run;

use commands::exec::ExecArgs;
use commands::iptables::IptablesArgs;
use commands::lifecycle::{KillArgs, PauseArgs, RemoveArgs, RestartArgs, StopArgs};
use commands::netem::NetemArgs;
use commands::stress::StressArgs;
use commands::Invocation;

/// Chaos testing for Docker and containerd containers.
#[derive(Parser, Debug)]
#[command(name = "havoc")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./havoc.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Container engine: docker or containerd
    #[arg(long, global = true)]
    runtime: Option<Engine>,

    /// Only target containers with this label, key or key=value (repeatable, comma-separated)
    #[arg(long, global = true)]
    label: Vec<String>,

    /// Pick one random container from the matches
    #[arg(long, global = true)]
    random: bool,

    /// Log what would be done without changing any container
    #[arg(long, global = true)]
    dry_run: bool,

    /// Keep running after a failed batch
    #[arg(long, global = true)]
    skip_error: bool,

    /// Give every target its own apply/hold/revert clock
    #[arg(long, global = true)]
    per_target: bool,

    /// Repeat every interval, e.g. 5m; absent or 0 runs once
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Emulate network faults with tc netem
    Netem(NetemArgs),

    /// Drop packets with iptables
    Iptables(IptablesArgs),

    /// Stress containers with stress-ng
    Stress(StressArgs),

    /// Pause all processes
    Pause(PauseArgs),

    /// Send a signal to the main process
    Kill(KillArgs),

    /// Stop containers
    Stop(StopArgs),

    /// Remove containers
    Rm(RemoveArgs),

    /// Restart containers
    Restart(RestartArgs),

    /// Run a command inside containers
    Exec(ExecArgs),
}

impl Cli {
    /// Flags override the config file.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(engine) = self.runtime {
            config.runtime.engine = engine;
        }
        if let Some(interval) = self.interval {
            config.schedule.interval = interval;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        config.schedule.random |= self.random;
        config.schedule.dry_run |= self.dry_run;
        config.schedule.skip_error |= self.skip_error;
        config.schedule.per_target |= self.per_target;
        config.log.json |= self.log_json;
    }
}

impl Commands {
    fn invocation(self, config: &Config) -> Result<Invocation> {
        let invocation = match self {
            Commands::Netem(args) => args.invocation(config)?,
            Commands::Iptables(args) => args.invocation(config)?,
            Commands::Stress(args) => args.invocation(config)?,
            Commands::Pause(args) => args.invocation(),
            Commands::Kill(args) => args.invocation(),
            Commands::Stop(args) => args.invocation(),
            Commands::Rm(args) => args.invocation(),
            Commands::Restart(args) => args.invocation(),
            Commands::Exec(args) => args.invocation(),
        };
        Ok(invocation)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    telemetry::init(&config.log)?;

    // Everything is validated before the engine is contacted
    let labels = cli.label;
    let invocation = cli.command.invocation(&config)?;
    let policy = invocation.policy(&labels, config.schedule.random)?;
    let plan = invocation.plan(config.schedule.interval)?;

    run::execute(&config, &policy, &plan).await?;
    Ok(())
}
