//! Error types for target selection and disruption validation

use thiserror::Error;

/// Errors raised while building or evaluating a selection policy.
///
/// All of these are fatal: they abort the run before any container is touched.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Both explicit names and a pattern were supplied
    #[error("container names and a pattern are mutually exclusive")]
    NamesAndPattern,

    /// Pattern is not a valid regular expression
    #[error("invalid target pattern {pattern:?}: {source}")]
    BadPattern {
        /// The offending pattern
        pattern: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// Label selector is malformed
    #[error("invalid label selector: {0}")]
    BadLabel(#[from] havoc_types::ContainerError),

    /// Container engine could not be listed
    #[error("failed to list containers: {0}")]
    Listing(String),
}

/// Errors raised while validating disruption parameters.
///
/// Raised once at construction, before scheduling starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Network interface name is not acceptable to `tc`/`iptables`
    #[error("bad network interface name {0:?}: must match '[a-zA-Z][a-zA-Z0-9_-]*'")]
    BadInterface(String),

    /// Target address is neither an IP nor a CIDR block
    #[error("bad target: {0:?} is not a valid IP or CIDR")]
    BadAddress(String),

    /// IPv6 network given to a filter that only speaks IPv4
    #[error("bad target: {0} is IPv6, but tc and iptables filters only match IPv4")]
    Ipv6Target(String),

    /// A percentage or probability is outside its allowed range
    #[error("invalid {name}: {value} must be between {min} and {max}")]
    OutOfRange {
        /// Parameter name
        name: &'static str,
        /// Supplied value
        value: f64,
        /// Lower bound (inclusive)
        min: f64,
        /// Upper bound (inclusive)
        max: f64,
    },

    /// Delay time is zero
    #[error("invalid delay time: must be a positive number of milliseconds")]
    ZeroDelay,

    /// Jitter exceeds the delay time
    #[error("invalid delay jitter {jitter}ms: must not exceed delay time {time}ms")]
    JitterTooLarge {
        /// Jitter in milliseconds
        jitter: u64,
        /// Delay time in milliseconds
        time: u64,
    },

    /// Unknown delay distribution
    #[error("invalid delay distribution {0:?}: must be one of uniform, normal, pareto, paretonormal")]
    BadDistribution(String),

    /// Rate does not match `<digits>[gmk]bit`
    #[error("invalid rate {0:?}: must match '[0-9]+[gmk]?bit'")]
    BadRate(String),

    /// nth-mode `every` is zero
    #[error("invalid packet loss every: must be greater than 0")]
    ZeroEvery,

    /// nth-mode `packet` is not below `every`
    #[error("invalid packet loss packet {packet}: must be between 0 and {max}")]
    PacketOutOfRange {
        /// Supplied packet index
        packet: u32,
        /// Largest allowed index (`every - 1`)
        max: u32,
    },

    /// Port filter on a protocol without ports
    #[error("port filters require protocol tcp or udp, got {0}")]
    PortsWithoutProtocol(String),

    /// Unknown enumerated value
    #[error("unknown {kind} {value:?}")]
    Unknown {
        /// What kind of value was expected
        kind: &'static str,
        /// Supplied value
        value: String,
    },

    /// Stress needs at least one stressor
    #[error("stress-ng stressors must not be empty")]
    NoStressors,

    /// Signal name or number is not a Linux signal
    #[error("unknown signal {0:?}")]
    BadSignal(String),

    /// Exec needs a command
    #[error("exec command must not be empty")]
    EmptyCommand,

    /// Time-bounded disruption without a duration
    #[error("{0} requires a positive duration")]
    MissingDuration(&'static str),

    /// One-shot disruption given a duration
    #[error("{0} does not take a duration")]
    UnexpectedDuration(&'static str),

    /// Duration is not shorter than a non-zero interval
    #[error("duration {duration:?} must be shorter than interval {interval:?}")]
    DurationExceedsInterval {
        /// Disruption duration
        duration: std::time::Duration,
        /// Schedule interval
        interval: std::time::Duration,
    },
}
