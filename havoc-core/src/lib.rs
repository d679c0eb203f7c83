//! # havoc-core
//!
//! Pure logic for havoc (no I/O, instant tests).
//!
//! This crate decides *what* to do to containers without touching any of
//! them:
//! - [`selection`] - Which containers a run targets
//! - [`netem`] - `tc` argument vectors for network emulation
//! - [`iptables`] - `iptables` argument vectors for packet drops
//! - [`stress`] - `stress-ng` parameters
//! - [`disruption`] - Disruption kinds and validated plans
//!
//! ## Design Philosophy
//!
//! Everything here is validated once at construction and then only read.
//! Builders return plain `Vec<Vec<String>>` command lists; running them
//! inside a container is the job of `havoc-runtime`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cidr;
pub mod disruption;
pub mod error;
pub mod iptables;
pub mod netem;
pub mod selection;
pub mod stress;

pub use cidr::Cidr;
pub use disruption::{Disruption, DisruptionPlan, HelperImage, Signal};
pub use error::{SelectionError, ValidationError};
pub use iptables::{LossMode, PacketFilter, PacketLossSpec, Protocol, IPTABLES};
pub use netem::{Distribution, NetemCommand, NetemSpec, TrafficFilter, DEFAULT_INTERFACE, TC};
pub use selection::{SelectionPolicy, Targets};
pub use stress::{StressSpec, DEFAULT_STRESS_IMAGE};
