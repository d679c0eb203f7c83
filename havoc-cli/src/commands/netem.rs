//! `havoc netem`: emulate network faults with `tc netem`.

use anyhow::Result;
use clap::{Args, Subcommand};
use havoc_core::{
    Disruption, Distribution, NetemCommand, NetemSpec, TrafficFilter, ValidationError,
    DEFAULT_INTERFACE,
};
use havoc_engine::Config;
use std::time::Duration;

use super::{helper, Invocation, TargetArgs};

/// Flags shared by every netem fault.
#[derive(Args, Debug)]
pub struct NetemArgs {
    /// How long to hold the fault, e.g. 30s or 5m
    #[arg(long, short, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Network interface inside the target
    #[arg(long, short, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Only affect traffic to this IP or CIDR (repeatable)
    #[arg(long = "target", short = 't', value_name = "IP")]
    pub target_ips: Vec<String>,

    /// Only affect traffic from these source ports (comma-separated)
    #[arg(long = "sport", value_delimiter = ',')]
    pub sports: Vec<u16>,

    /// Only affect traffic to these destination ports (comma-separated)
    #[arg(long = "dport", value_delimiter = ',')]
    pub dports: Vec<u16>,

    /// Sidecar image providing `tc`; without one `tc` runs inside the target
    #[arg(long)]
    pub tc_image: Option<String>,

    /// Pull the helper image before use
    #[arg(long)]
    pub pull_image: bool,

    #[command(subcommand)]
    pub fault: NetemFault,
}

/// Netem disciplines.
#[derive(Subcommand, Debug)]
pub enum NetemFault {
    /// Delay egress traffic
    Delay {
        /// Delay time in milliseconds
        #[arg(long, short, default_value_t = 100)]
        time: u64,
        /// Random delay variation in milliseconds
        #[arg(long, short, default_value_t = 10)]
        jitter: u64,
        /// Delay correlation in percent
        #[arg(long, short, default_value_t = 20.0)]
        correlation: f64,
        /// Delay distribution: uniform, normal, pareto or paretonormal
        #[arg(long, default_value = "")]
        distribution: String,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Drop egress packets
    Loss {
        /// Loss probability in percent
        #[arg(long, short, default_value_t = 0.0)]
        percent: f64,
        /// Loss correlation in percent
        #[arg(long, short, default_value_t = 0.0)]
        correlation: f64,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Drop egress packets following a 4-state Markov model
    LossState {
        /// Probability to go from good reception to burst losses
        #[arg(long, default_value_t = 0.0)]
        p13: f64,
        /// Probability to go from burst losses back to good reception
        #[arg(long, default_value_t = 100.0)]
        p31: f64,
        /// Probability to go from burst losses to bad reception
        #[arg(long, default_value_t = 0.0)]
        p32: f64,
        /// Probability to go from bad reception to burst losses
        #[arg(long, default_value_t = 100.0)]
        p23: f64,
        /// Probability of isolated losses
        #[arg(long, default_value_t = 0.0)]
        p14: f64,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Drop egress packets following the Gilbert-Elliot model
    LossGemodel {
        /// Transition probability into the bad state
        #[arg(long, default_value_t = 0.0)]
        pg: f64,
        /// Transition probability into the good state
        #[arg(long, default_value_t = 100.0)]
        pb: f64,
        /// Loss probability in the bad state
        #[arg(long = "one-h", default_value_t = 100.0)]
        one_h: f64,
        /// Loss probability in the good state
        #[arg(long = "one-k", default_value_t = 0.0)]
        one_k: f64,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Duplicate egress packets
    Duplicate {
        /// Duplication probability in percent
        #[arg(long, short, default_value_t = 0.0)]
        percent: f64,
        /// Duplication correlation in percent
        #[arg(long, short, default_value_t = 0.0)]
        correlation: f64,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Corrupt egress packets
    Corrupt {
        /// Corruption probability in percent
        #[arg(long, short, default_value_t = 0.0)]
        percent: f64,
        /// Corruption correlation in percent
        #[arg(long, short, default_value_t = 0.0)]
        correlation: f64,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Rate-limit egress traffic
    Rate {
        /// Egress rate, e.g. 100kbit
        #[arg(long, short, default_value = "100kbit")]
        rate: String,
        /// Per-packet overhead in bytes
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        packet_overhead: i32,
        /// Cell size of the simulated link layer
        #[arg(long, default_value_t = 0)]
        cell_size: u32,
        /// Per-cell overhead in bytes
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        cell_overhead: i32,
        #[command(flatten)]
        targets: TargetArgs,
    },
}

impl NetemFault {
    fn into_parts(self) -> Result<(NetemCommand, TargetArgs), ValidationError> {
        let parts = match self {
            Self::Delay {
                time,
                jitter,
                correlation,
                distribution,
                targets,
            } => (
                NetemCommand::Delay {
                    time_ms: time,
                    jitter_ms: jitter,
                    correlation,
                    distribution: Distribution::parse_optional(&distribution)?,
                },
                targets,
            ),
            Self::Loss {
                percent,
                correlation,
                targets,
            } => (
                NetemCommand::Loss {
                    percent,
                    correlation,
                },
                targets,
            ),
            Self::LossState {
                p13,
                p31,
                p32,
                p23,
                p14,
                targets,
            } => (
                NetemCommand::LossState {
                    p13,
                    p31,
                    p32,
                    p23,
                    p14,
                },
                targets,
            ),
            Self::LossGemodel {
                pg,
                pb,
                one_h,
                one_k,
                targets,
            } => (
                NetemCommand::LossGemodel {
                    pg,
                    pb,
                    one_h,
                    one_k,
                },
                targets,
            ),
            Self::Duplicate {
                percent,
                correlation,
                targets,
            } => (
                NetemCommand::Duplicate {
                    percent,
                    correlation,
                },
                targets,
            ),
            Self::Corrupt {
                percent,
                correlation,
                targets,
            } => (
                NetemCommand::Corrupt {
                    percent,
                    correlation,
                },
                targets,
            ),
            Self::Rate {
                rate,
                packet_overhead,
                cell_size,
                cell_overhead,
                targets,
            } => (
                NetemCommand::Rate {
                    rate,
                    packet_overhead,
                    cell_size,
                    cell_overhead,
                },
                targets,
            ),
        };
        Ok(parts)
    }
}

impl NetemArgs {
    /// Validate the flags into a netem invocation.
    pub fn invocation(self, config: &Config) -> Result<Invocation> {
        let filter = TrafficFilter::parse(&self.target_ips, &self.sports, &self.dports)?;
        let (command, targets) = self.fault.into_parts()?;
        let spec = NetemSpec::new(self.interface, command, filter)?;
        let helper = helper(
            self.tc_image,
            self.pull_image || config.helpers.pull,
            config.tc_helper(),
        );
        Ok(Invocation {
            targets,
            disruption: Disruption::Netem { spec, helper },
            duration: self.duration,
        })
    }
}
