//! `tc netem` command builder for network emulation.
//!
//! Builds `tc` argument vectors for injecting latency, loss, duplication,
//! corruption and rate limits via Linux traffic control. The vectors are
//! passed verbatim to `tc` inside the target's network namespace, so their
//! exact shape matters.
//!
//! Without filters a single root `netem` qdisc is installed. With IP or port
//! filters, a `prio` tree is installed instead: bands 1 and 2 keep normal
//! traffic on `sfq`, band 3 carries `netem`, and `u32` filters steer matching
//! packets into band 3.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::cidr::Cidr;
use crate::error::ValidationError;

/// Executable the netem vectors are meant for.
pub const TC: &str = "tc";

/// Default network interface inside containers.
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Validate a network interface name.
pub fn validate_interface(iface: &str) -> Result<(), ValidationError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new("^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap_or_else(|_| unreachable!("static regex"))
    });
    if re.is_match(iface) {
        Ok(())
    } else {
        Err(ValidationError::BadInterface(iface.to_string()))
    }
}

pub(crate) fn check_range(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn check_percent(name: &'static str, value: f64) -> Result<(), ValidationError> {
    check_range(name, value, 0.0, 100.0)
}

fn two_decimals(value: f64) -> String {
    format!("{value:.2}")
}

fn validate_rate(rate: &str) -> Result<(), ValidationError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new("^[0-9]+[gmk]?bit$").unwrap_or_else(|_| unreachable!("static regex"))
    });
    if re.is_match(rate) {
        Ok(())
    } else {
        Err(ValidationError::BadRate(rate.to_string()))
    }
}

/// Delay distribution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// `uniform`
    Uniform,
    /// `normal`
    Normal,
    /// `pareto`
    Pareto,
    /// `paretonormal`
    ParetoNormal,
}

impl Distribution {
    /// Name as understood by `tc`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Normal => "normal",
            Self::Pareto => "pareto",
            Self::ParetoNormal => "paretonormal",
        }
    }

    /// Parse an optional distribution. The empty string means none.
    pub fn parse_optional(raw: &str) -> Result<Option<Self>, ValidationError> {
        if raw.is_empty() {
            Ok(None)
        } else {
            raw.parse().map(Some)
        }
    }
}

impl FromStr for Distribution {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "uniform" => Ok(Self::Uniform),
            "normal" => Ok(Self::Normal),
            "pareto" => Ok(Self::Pareto),
            "paretonormal" => Ok(Self::ParetoNormal),
            other => Err(ValidationError::BadDistribution(other.to_string())),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single netem discipline with its parameters.
///
/// Percentages and correlations are in `0.0..=100.0`. Optional trailing
/// values are only emitted when non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetemCommand {
    /// `delay <time>ms [<jitter>ms] [<correlation>] [distribution <d>]`
    Delay {
        /// Delay in milliseconds (> 0).
        time_ms: u64,
        /// Jitter in milliseconds (≤ time).
        #[serde(default)]
        jitter_ms: u64,
        /// Correlation percentage.
        #[serde(default)]
        correlation: f64,
        /// Delay distribution.
        #[serde(default)]
        distribution: Option<Distribution>,
    },
    /// `loss <percent> [<correlation>]`
    Loss {
        /// Loss percentage.
        percent: f64,
        /// Correlation percentage.
        #[serde(default)]
        correlation: f64,
    },
    /// `loss state <p13> <p31> <p32> <p23> <p14>` (4-state Markov model)
    LossState {
        /// Probability to go from good reception to burst losses.
        p13: f64,
        /// Probability to go from burst losses back to good reception.
        p31: f64,
        /// Probability to go from burst losses to bad reception.
        p32: f64,
        /// Probability to go from bad reception to burst losses.
        p23: f64,
        /// Probability of isolated losses.
        p14: f64,
    },
    /// `loss gemodel <pg> <pb> <1-h> <1-k>` (Gilbert-Elliot model)
    LossGemodel {
        /// Transition probability into the bad state.
        pg: f64,
        /// Transition probability into the good state.
        pb: f64,
        /// Loss probability in the bad state.
        one_h: f64,
        /// Loss probability in the good state.
        one_k: f64,
    },
    /// `duplicate <percent> [<correlation>]`
    Duplicate {
        /// Duplication percentage.
        percent: f64,
        /// Correlation percentage.
        #[serde(default)]
        correlation: f64,
    },
    /// `corrupt <percent> [<correlation>]`
    Corrupt {
        /// Corruption percentage.
        percent: f64,
        /// Correlation percentage.
        #[serde(default)]
        correlation: f64,
    },
    /// `rate <rate> [<packet-overhead>] [<cell-size>] [<cell-overhead>]`
    Rate {
        /// Egress rate, e.g. `100kbit`.
        rate: String,
        /// Per-packet overhead in bytes.
        #[serde(default)]
        packet_overhead: i32,
        /// Link layer cell size in bytes.
        #[serde(default)]
        cell_size: u32,
        /// Per-cell overhead in bytes.
        #[serde(default)]
        cell_overhead: i32,
    },
}

impl NetemCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delay { .. } => "delay",
            Self::Loss { .. } => "loss",
            Self::LossState { .. } => "loss state",
            Self::LossGemodel { .. } => "loss gemodel",
            Self::Duplicate { .. } => "duplicate",
            Self::Corrupt { .. } => "corrupt",
            Self::Rate { .. } => "rate",
        }
    }

    /// Check every parameter against its allowed range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Delay {
                time_ms,
                jitter_ms,
                correlation,
                ..
            } => {
                if *time_ms == 0 {
                    return Err(ValidationError::ZeroDelay);
                }
                if jitter_ms > time_ms {
                    return Err(ValidationError::JitterTooLarge {
                        jitter: *jitter_ms,
                        time: *time_ms,
                    });
                }
                check_percent("delay correlation", *correlation)
            }
            Self::Loss {
                percent,
                correlation,
            } => {
                check_percent("loss percent", *percent)?;
                check_percent("loss correlation", *correlation)
            }
            Self::LossState {
                p13,
                p31,
                p32,
                p23,
                p14,
            } => {
                check_percent("p13", *p13)?;
                check_percent("p31", *p31)?;
                check_percent("p32", *p32)?;
                check_percent("p23", *p23)?;
                check_percent("p14", *p14)
            }
            Self::LossGemodel {
                pg,
                pb,
                one_h,
                one_k,
            } => {
                check_percent("pg", *pg)?;
                check_percent("pb", *pb)?;
                check_percent("1-h", *one_h)?;
                check_percent("1-k", *one_k)
            }
            Self::Duplicate {
                percent,
                correlation,
            } => {
                check_percent("duplicate percent", *percent)?;
                check_percent("duplicate correlation", *correlation)
            }
            Self::Corrupt {
                percent,
                correlation,
            } => {
                check_percent("corrupt percent", *percent)?;
                check_percent("corrupt correlation", *correlation)
            }
            Self::Rate { rate, .. } => validate_rate(rate),
        }
    }

    /// Netem arguments following the `netem` keyword.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            Self::Delay {
                time_ms,
                jitter_ms,
                correlation,
                distribution,
            } => {
                args.push("delay".into());
                args.push(format!("{time_ms}ms"));
                if *jitter_ms > 0 {
                    args.push(format!("{jitter_ms}ms"));
                }
                if *correlation > 0.0 {
                    args.push(two_decimals(*correlation));
                }
                if let Some(d) = distribution {
                    args.push("distribution".into());
                    args.push(d.as_str().into());
                }
            }
            Self::Loss {
                percent,
                correlation,
            } => push_percent(&mut args, "loss", *percent, *correlation),
            Self::LossState {
                p13,
                p31,
                p32,
                p23,
                p14,
            } => {
                args.push("loss".into());
                args.push("state".into());
                args.extend([p13, p31, p32, p23, p14].map(|p| two_decimals(*p)));
            }
            Self::LossGemodel {
                pg,
                pb,
                one_h,
                one_k,
            } => {
                args.push("loss".into());
                args.push("gemodel".into());
                args.extend([pg, pb, one_h, one_k].map(|p| two_decimals(*p)));
            }
            Self::Duplicate {
                percent,
                correlation,
            } => push_percent(&mut args, "duplicate", *percent, *correlation),
            Self::Corrupt {
                percent,
                correlation,
            } => push_percent(&mut args, "corrupt", *percent, *correlation),
            Self::Rate {
                rate,
                packet_overhead,
                cell_size,
                cell_overhead,
            } => {
                args.push("rate".into());
                args.push(rate.clone());
                if *packet_overhead != 0 {
                    args.push(packet_overhead.to_string());
                }
                if *cell_size > 0 {
                    args.push(cell_size.to_string());
                }
                if *cell_overhead != 0 {
                    args.push(cell_overhead.to_string());
                }
            }
        }
        args
    }
}

fn push_percent(args: &mut Vec<String>, keyword: &str, percent: f64, correlation: f64) {
    args.push(keyword.into());
    args.push(two_decimals(percent));
    if correlation > 0.0 {
        args.push(two_decimals(correlation));
    }
}

/// Traffic selectors for a filtered netem tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficFilter {
    /// Destination networks.
    #[serde(default)]
    pub ips: Vec<Cidr>,
    /// Source ports.
    #[serde(default)]
    pub sports: Vec<u16>,
    /// Destination ports.
    #[serde(default)]
    pub dports: Vec<u16>,
}

impl TrafficFilter {
    /// True if no selector is set.
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.sports.is_empty() && self.dports.is_empty()
    }

    /// Parse textual addresses and ports.
    pub fn parse(ips: &[String], sports: &[u16], dports: &[u16]) -> Result<Self, ValidationError> {
        Ok(Self {
            ips: ips
                .iter()
                .map(|ip| ip.parse::<Cidr>().and_then(Cidr::require_ipv4))
                .collect::<Result<Vec<_>, _>>()?,
            sports: sports.to_vec(),
            dports: dports.to_vec(),
        })
    }

    /// Check that every network can be matched by a `protocol ip` filter.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.ips.iter().try_for_each(|ip| ip.require_ipv4().map(drop))
    }
}

/// A validated netem disruption for one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetemSpec {
    interface: String,
    command: NetemCommand,
    #[serde(default)]
    filter: TrafficFilter,
}

impl NetemSpec {
    /// Validate and build a netem spec.
    pub fn new(
        interface: impl Into<String>,
        command: NetemCommand,
        filter: TrafficFilter,
    ) -> Result<Self, ValidationError> {
        let interface = interface.into();
        validate_interface(&interface)?;
        command.validate()?;
        filter.validate()?;
        Ok(Self {
            interface,
            command,
            filter,
        })
    }

    /// Interface the qdisc is attached to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Netem discipline.
    pub fn command(&self) -> &NetemCommand {
        &self.command
    }

    /// Traffic filter.
    pub fn filter(&self) -> &TrafficFilter {
        &self.filter
    }

    /// Re-check all parameters (used after deserialization).
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_interface(&self.interface)?;
        self.command.validate()?;
        self.filter.validate()
    }

    fn qdisc(&self, verb: &str, tail: &[&str]) -> Vec<String> {
        ["qdisc", verb, "dev", self.interface.as_str()]
            .iter()
            .chain(tail)
            .map(|s| s.to_string())
            .collect()
    }

    fn u32_filter(&self, selector: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = [
            "filter",
            "add",
            "dev",
            self.interface.as_str(),
            "protocol",
            "ip",
            "parent",
            "1:0",
            "prio",
            "1",
            "u32",
            "match",
            "ip",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        cmd.extend_from_slice(selector);
        cmd.push("flowid".into());
        cmd.push("1:3".into());
        cmd
    }

    /// `tc` argument vectors that install the disruption.
    pub fn apply_commands(&self) -> Vec<Vec<String>> {
        let netem_args = self.command.args();

        if self.filter.is_empty() {
            let mut cmd = self.qdisc("add", &["root", "netem"]);
            cmd.extend(netem_args);
            return vec![cmd];
        }

        let mut netem = self.qdisc("add", &["parent", "1:3", "handle", "30:", "netem"]);
        netem.extend(netem_args);

        let mut commands = vec![
            self.qdisc("add", &["root", "handle", "1:", "prio"]),
            self.qdisc("add", &["parent", "1:1", "handle", "10:", "sfq"]),
            self.qdisc("add", &["parent", "1:2", "handle", "20:", "sfq"]),
            netem,
        ];
        for ip in &self.filter.ips {
            commands.push(self.u32_filter(&["dst".into(), ip.to_string()]));
        }
        for port in &self.filter.sports {
            commands.push(self.u32_filter(&["sport".into(), port.to_string(), "0xffff".into()]));
        }
        for port in &self.filter.dports {
            commands.push(self.u32_filter(&["dport".into(), port.to_string(), "0xffff".into()]));
        }
        commands
    }

    /// `tc` argument vectors that remove the disruption.
    ///
    /// The filtered tree is removed by deleting its root; children and
    /// filters go with it.
    pub fn revert_commands(&self) -> Vec<Vec<String>> {
        if self.filter.is_empty() {
            vec![self.qdisc("del", &["root", "netem"])]
        } else {
            vec![self.qdisc("del", &["root", "handle", "1:", "prio"])]
        }
    }
}
