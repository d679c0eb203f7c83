//! # havoc-engine
//!
//! Orchestration for havoc.
//!
//! Given a validated [`SelectionPolicy`](havoc_core::SelectionPolicy) and
//! [`DisruptionPlan`](havoc_core::DisruptionPlan), the [`Scheduler`] resolves
//! targets on every tick and hands them to the [`Orchestrator`], which
//! applies the disruption concurrently, holds it, and reverts whatever was
//! applied, even when the run is interrupted through [`Shutdown`].
//!
//! Configuration ([`Config`]) and logging setup ([`telemetry`]) live here so
//! the binary stays thin.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

pub use action::{apply, revert, Applied, Undo};
pub use config::{
    Config, ConfigError, HelpersConfig, LogConfig, RuntimeConfig, ScheduleConfig,
    DEFAULT_CONFIG_FILE,
};
pub use error::{EngineError, Result};
pub use orchestrator::{
    BatchReport, Orchestrator, TargetOutcome, TargetState, DEFAULT_REVERT_TIMEOUT,
};
pub use resolver::resolve_targets;
pub use scheduler::{RunSummary, ScheduleSettings, Scheduler};
pub use shutdown::Shutdown;
