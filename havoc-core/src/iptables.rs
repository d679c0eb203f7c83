//! `iptables` packet-drop rule builder.
//!
//! Drops incoming packets on an interface using the `statistic` match, either
//! at random or every nth packet. Each filter value gets its own rule, so
//! reverting deletes exactly the rules that were inserted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cidr::Cidr;
use crate::error::ValidationError;
use crate::netem::{check_range, validate_interface};

/// Executable the rule vectors are meant for.
pub const IPTABLES: &str = "iptables";

/// Packet selection mode for the `statistic` match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LossMode {
    /// Drop each packet with the given probability (`0.0..=1.0`).
    Random {
        /// Drop probability.
        probability: f64,
    },
    /// Drop packet `packet` out of every `every` packets.
    Nth {
        /// Cycle length (> 0).
        every: u32,
        /// Index within the cycle (`0..every`).
        #[serde(default)]
        packet: u32,
    },
}

impl LossMode {
    /// Check the mode parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Self::Random { probability } => check_range("probability", probability, 0.0, 1.0),
            Self::Nth { every, packet } => {
                if every == 0 {
                    return Err(ValidationError::ZeroEvery);
                }
                if packet > every - 1 {
                    return Err(ValidationError::PacketOutOfRange {
                        packet,
                        max: every - 1,
                    });
                }
                Ok(())
            }
        }
    }

    fn suffix(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-m".into(), "statistic".into(), "--mode".into()];
        match *self {
            Self::Random { probability } => {
                args.push("random".into());
                args.push("--probability".into());
                args.push(format!("{probability:.2}"));
            }
            Self::Nth { every, packet } => {
                args.push("nth".into());
                args.push("--every".into());
                args.push(every.to_string());
                args.push("--packet".into());
                args.push(packet.to_string());
            }
        }
        args.push("-j".into());
        args.push("DROP".into());
        args
    }
}

/// IP protocol matched by the rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Every protocol (no `-p` argument).
    #[default]
    Any,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

impl Protocol {
    /// Name as understood by `iptables`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
        }
    }

    /// True if the protocol has ports.
    pub fn has_ports(&self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "any" => Ok(Self::Any),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "icmp" => Ok(Self::Icmp),
            other => Err(ValidationError::Unknown {
                kind: "protocol",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source/destination selectors. One rule is emitted per value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFilter {
    /// Source networks (`-s`).
    #[serde(default)]
    pub src_ips: Vec<Cidr>,
    /// Destination networks (`-d`).
    #[serde(default)]
    pub dst_ips: Vec<Cidr>,
    /// Source ports (`--sport`).
    #[serde(default)]
    pub sports: Vec<u16>,
    /// Destination ports (`--dport`).
    #[serde(default)]
    pub dports: Vec<u16>,
}

impl PacketFilter {
    /// Parse textual addresses alongside ports.
    pub fn parse(
        src_ips: &[String],
        dst_ips: &[String],
        sports: &[u16],
        dports: &[u16],
    ) -> Result<Self, ValidationError> {
        let parse_all = |ips: &[String]| {
            ips.iter()
                .map(|ip| ip.parse::<Cidr>().and_then(Cidr::require_ipv4))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            src_ips: parse_all(src_ips)?,
            dst_ips: parse_all(dst_ips)?,
            sports: sports.to_vec(),
            dports: dports.to_vec(),
        })
    }

    /// Check that every network can be matched by `iptables`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.src_ips
            .iter()
            .chain(&self.dst_ips)
            .try_for_each(|ip| ip.require_ipv4().map(drop))
    }

    fn has_ports(&self) -> bool {
        !self.sports.is_empty() || !self.dports.is_empty()
    }

    fn selectors(&self) -> Vec<[String; 2]> {
        let ips = |flag: &str, ips: &[Cidr]| {
            ips.iter()
                .map(|ip| [flag.to_string(), ip.to_string()])
                .collect::<Vec<_>>()
        };
        let ports = |flag: &str, ports: &[u16]| {
            ports
                .iter()
                .map(|p| [flag.to_string(), p.to_string()])
                .collect::<Vec<_>>()
        };
        let mut out = ips("-s", &self.src_ips);
        out.extend(ips("-d", &self.dst_ips));
        out.extend(ports("--sport", &self.sports));
        out.extend(ports("--dport", &self.dports));
        out
    }
}

/// A validated iptables packet-loss disruption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketLossSpec {
    interface: String,
    #[serde(default)]
    protocol: Protocol,
    mode: LossMode,
    #[serde(default)]
    filter: PacketFilter,
}

impl PacketLossSpec {
    /// Validate and build a packet-loss spec.
    pub fn new(
        interface: impl Into<String>,
        protocol: Protocol,
        mode: LossMode,
        filter: PacketFilter,
    ) -> Result<Self, ValidationError> {
        let spec = Self {
            interface: interface.into(),
            protocol,
            mode,
            filter,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Re-check all parameters (used after deserialization).
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_interface(&self.interface)?;
        self.mode.validate()?;
        self.filter.validate()?;
        if self.filter.has_ports() && !self.protocol.has_ports() {
            return Err(ValidationError::PortsWithoutProtocol(
                self.protocol.to_string(),
            ));
        }
        Ok(())
    }

    /// Interface the rules match on.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Matched protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Drop mode.
    pub fn mode(&self) -> LossMode {
        self.mode
    }

    /// Source/destination filter.
    pub fn filter(&self) -> &PacketFilter {
        &self.filter
    }

    fn rules(&self, action: &str) -> Vec<Vec<String>> {
        let mut prefix: Vec<String> = vec![
            action.into(),
            "INPUT".into(),
            "-i".into(),
            self.interface.clone(),
        ];
        if self.protocol != Protocol::Any {
            prefix.push("-p".into());
            prefix.push(self.protocol.as_str().into());
        }
        let suffix = self.mode.suffix();

        let selectors = self.filter.selectors();
        if selectors.is_empty() {
            return vec![[prefix, suffix].concat()];
        }
        selectors
            .into_iter()
            .map(|selector| [prefix.clone(), selector.to_vec(), suffix.clone()].concat())
            .collect()
    }

    /// `iptables` argument vectors that insert the drop rules.
    pub fn apply_commands(&self) -> Vec<Vec<String>> {
        self.rules("-I")
    }

    /// `iptables` argument vectors that delete the drop rules.
    pub fn revert_commands(&self) -> Vec<Vec<String>> {
        self.rules("-D")
    }
}
