//! Disruption kinds and validated plans.
//!
//! A [`Disruption`] is either time-bounded (applied, held for a duration,
//! then reverted) or one-shot (applied once, nothing to revert). A
//! [`DisruptionPlan`] pairs a disruption with its duration and is validated
//! exactly once, before scheduling starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ValidationError;
use crate::iptables::PacketLossSpec;
use crate::netem::NetemSpec;
use crate::stress::StressSpec;

/// Signal sent by `kill` when none is given.
pub const DEFAULT_KILL_SIGNAL: &str = "SIGKILL";

/// Grace period for `stop` and `restart` when none is given.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Linux signal table (name, number).
const SIGNALS: &[(&str, u8)] = &[
    ("SIGHUP", 1),
    ("SIGINT", 2),
    ("SIGQUIT", 3),
    ("SIGILL", 4),
    ("SIGTRAP", 5),
    ("SIGIOT", 6),
    ("SIGABRT", 6),
    ("SIGBUS", 7),
    ("SIGFPE", 8),
    ("SIGKILL", 9),
    ("SIGUSR1", 10),
    ("SIGSEGV", 11),
    ("SIGUSR2", 12),
    ("SIGPIPE", 13),
    ("SIGALRM", 14),
    ("SIGTERM", 15),
    ("SIGSTKFLT", 16),
    ("SIGCHLD", 17),
    ("SIGCONT", 18),
    ("SIGSTOP", 19),
    ("SIGTSTP", 20),
    ("SIGTTIN", 21),
    ("SIGTTOU", 22),
    ("SIGURG", 23),
    ("SIGXCPU", 24),
    ("SIGXFSZ", 25),
    ("SIGVTALRM", 26),
    ("SIGPROF", 27),
    ("SIGWINCH", 28),
    ("SIGIO", 29),
    ("SIGPWR", 30),
    ("SIGSYS", 31),
];

/// A validated Linux signal, stored by canonical name (e.g. `SIGTERM`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Signal(&'static str);

impl Signal {
    /// `SIGKILL`
    pub const KILL: Signal = Signal("SIGKILL");
    /// `SIGTERM`
    pub const TERM: Signal = Signal("SIGTERM");

    /// Canonical signal name.
    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Signal number.
    pub fn number(&self) -> u8 {
        SIGNALS
            .iter()
            .find(|(name, _)| *name == self.0)
            .map(|(_, num)| *num)
            .unwrap_or(0)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::KILL
    }
}

impl FromStr for Signal {
    type Err = ValidationError;

    /// Accepts `SIGTERM`, `TERM`, `term` or `15`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Ok(num) = trimmed.parse::<u8>() {
            return SIGNALS
                .iter()
                .find(|(_, n)| *n == num)
                .map(|(name, _)| Signal(*name))
                .ok_or_else(|| ValidationError::BadSignal(raw.to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();
        let wanted = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        SIGNALS
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(name, _)| Signal(*name))
            .ok_or_else(|| ValidationError::BadSignal(raw.to_string()))
    }
}

// The name is borrowed from the static table, so the input lifetime never leaks in.
impl<'de> Deserialize<'de> for Signal {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl From<Signal> for String {
    fn from(value: Signal) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Helper image used to reach a target's namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperImage {
    /// Image reference.
    pub image: String,
    /// Pull before creating the helper.
    #[serde(default)]
    pub pull: bool,
}

impl HelperImage {
    /// Helper image without pulling.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            pull: false,
        }
    }

    /// Build from an optional image reference. Blank means no helper.
    pub fn optional(image: Option<String>, pull: bool) -> Option<Self> {
        image
            .filter(|i| !i.trim().is_empty())
            .map(|image| Self { image, pull })
    }
}

/// A fault to inject into a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disruption {
    /// Network emulation via `tc netem`.
    Netem {
        /// Netem parameters.
        spec: NetemSpec,
        /// Sidecar image with `tc`; `None` runs `tc` inside the target.
        #[serde(default)]
        helper: Option<HelperImage>,
    },
    /// Packet drop via `iptables`.
    PacketLoss {
        /// Drop rule parameters.
        spec: PacketLossSpec,
        /// Sidecar image with `iptables`; `None` runs inside the target.
        #[serde(default)]
        helper: Option<HelperImage>,
    },
    /// CPU/memory/IO stress inside the target's cgroup.
    Stress(StressSpec),
    /// Freeze all processes; reverted by unpausing.
    Pause,
    /// Stop the container; with `restart`, start it again after the duration.
    Stop {
        /// Grace period before the engine kills the container.
        #[serde(default = "default_stop_timeout", with = "humantime_serde")]
        timeout: Duration,
        /// Start the container again once the duration elapses.
        #[serde(default)]
        restart: bool,
    },
    /// Send a signal to the main process.
    Kill {
        /// Signal to send.
        #[serde(default)]
        signal: Signal,
    },
    /// Remove the container.
    Remove {
        /// Kill a running container before removal.
        #[serde(default)]
        force: bool,
        /// Remove links to the container.
        #[serde(default)]
        links: bool,
        /// Remove anonymous volumes.
        #[serde(default)]
        volumes: bool,
    },
    /// Restart the container.
    Restart {
        /// Grace period before the engine kills the container.
        #[serde(default = "default_stop_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
    /// Run a command inside the container.
    Exec {
        /// Executable.
        command: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}

impl Disruption {
    /// `exec` with the default command (`kill 1`).
    pub fn default_exec() -> Self {
        Self::Exec {
            command: "kill".into(),
            args: vec!["1".into()],
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Netem { .. } => "netem",
            Self::PacketLoss { .. } => "iptables loss",
            Self::Stress(_) => "stress",
            Self::Pause => "pause",
            Self::Stop { .. } => "stop",
            Self::Kill { .. } => "kill",
            Self::Remove { .. } => "rm",
            Self::Restart { .. } => "restart",
            Self::Exec { .. } => "exec",
        }
    }

    /// True if the disruption is held for a duration and then reverted.
    pub fn is_time_bounded(&self) -> bool {
        match self {
            Self::Netem { .. } | Self::PacketLoss { .. } | Self::Stress(_) | Self::Pause => true,
            Self::Stop { restart, .. } => *restart,
            Self::Kill { .. } | Self::Remove { .. } | Self::Restart { .. } | Self::Exec { .. } => {
                false
            }
        }
    }

    /// Check all parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Netem { spec, .. } => spec.validate(),
            Self::PacketLoss { spec, .. } => spec.validate(),
            Self::Stress(spec) => spec.validate(),
            Self::Exec { command, .. } if command.trim().is_empty() => {
                Err(ValidationError::EmptyCommand)
            }
            _ => Ok(()),
        }
    }
}

/// A disruption with its hold duration, validated once.
#[derive(Debug, Clone, PartialEq)]
pub struct DisruptionPlan {
    disruption: Disruption,
    duration: Option<Duration>,
}

impl DisruptionPlan {
    /// Validate a plan.
    ///
    /// Time-bounded disruptions need a positive duration; one-shot
    /// disruptions must not have one. With a non-zero `interval`, the
    /// duration must be strictly shorter than it.
    pub fn new(
        disruption: Disruption,
        duration: Option<Duration>,
        interval: Duration,
    ) -> Result<Self, ValidationError> {
        disruption.validate()?;

        let duration = duration.filter(|d| !d.is_zero());
        match (disruption.is_time_bounded(), duration) {
            (true, None) => return Err(ValidationError::MissingDuration(disruption.name())),
            (false, Some(_)) => return Err(ValidationError::UnexpectedDuration(disruption.name())),
            _ => {}
        }

        if let Some(duration) = duration {
            if !interval.is_zero() && duration >= interval {
                return Err(ValidationError::DurationExceedsInterval { duration, interval });
            }
        }

        Ok(Self {
            disruption,
            duration,
        })
    }

    /// The disruption.
    pub fn disruption(&self) -> &Disruption {
        &self.disruption
    }

    /// Hold duration for time-bounded disruptions.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// True if targets are reverted after the duration.
    pub fn is_time_bounded(&self) -> bool {
        self.duration.is_some()
    }
}
