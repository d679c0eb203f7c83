//! `havoc iptables`: drop ingress packets with `iptables` rules.

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use havoc_core::{
    Disruption, LossMode, PacketFilter, PacketLossSpec, Protocol, DEFAULT_INTERFACE,
};
use havoc_engine::Config;
use std::time::Duration;

use super::{helper, Invocation, TargetArgs};

/// Flags shared by iptables faults.
#[derive(Args, Debug)]
pub struct IptablesArgs {
    /// How long to keep the rule, e.g. 30s or 5m
    #[arg(long, short, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Network interface inside the target
    #[arg(long, short, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Protocol to match: any, tcp, udp or icmp
    #[arg(long, short, default_value = "any")]
    pub protocol: Protocol,

    /// Only drop packets from this IP or CIDR (repeatable)
    #[arg(long, short, value_name = "IP")]
    pub source: Vec<String>,

    /// Only drop packets to this IP or CIDR (repeatable)
    #[arg(long, value_name = "IP")]
    pub destination: Vec<String>,

    /// Only drop packets from these source ports (comma-separated; tcp or udp)
    #[arg(long = "sport", value_delimiter = ',')]
    pub sports: Vec<u16>,

    /// Only drop packets to these destination ports (comma-separated; tcp or udp)
    #[arg(long = "dport", value_delimiter = ',')]
    pub dports: Vec<u16>,

    /// Sidecar image providing `iptables`; without one it runs inside the target
    #[arg(long)]
    pub iptables_image: Option<String>,

    /// Pull the helper image before use
    #[arg(long)]
    pub pull_image: bool,

    #[command(subcommand)]
    pub fault: IptablesFault,
}

/// Packet matching mode.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Drop each packet with a probability
    Random,
    /// Drop one packet out of every N
    Nth,
}

/// iptables faults.
#[derive(Subcommand, Debug)]
pub enum IptablesFault {
    /// Drop ingress packets
    Loss {
        /// Matching mode
        #[arg(long, value_enum, default_value_t = Mode::Random)]
        mode: Mode,
        /// Drop probability in random mode, between 0.0 and 1.0
        #[arg(long, default_value_t = 0.0)]
        probability: f64,
        /// Drop one packet every N, nth mode only
        #[arg(long, default_value_t = 0)]
        every: u32,
        /// Initial counter value (0 <= packet < every), nth mode only
        #[arg(long, default_value_t = 0)]
        packet: u32,
        #[command(flatten)]
        targets: TargetArgs,
    },
}

impl IptablesArgs {
    /// Validate the flags into a packet-loss invocation.
    pub fn invocation(self, config: &Config) -> Result<Invocation> {
        let IptablesFault::Loss {
            mode,
            probability,
            every,
            packet,
            targets,
        } = self.fault;
        let mode = match mode {
            Mode::Random => LossMode::Random { probability },
            Mode::Nth => LossMode::Nth { every, packet },
        };
        let filter = PacketFilter::parse(&self.source, &self.destination, &self.sports, &self.dports)?;
        let spec = PacketLossSpec::new(self.interface, self.protocol, mode, filter)?;
        let helper = helper(
            self.iptables_image,
            self.pull_image || config.helpers.pull,
            config.iptables_helper(),
        );
        Ok(Invocation {
            targets,
            disruption: Disruption::PacketLoss { spec, helper },
            duration: self.duration,
        })
    }
}
