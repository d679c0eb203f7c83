//! # havoc-runtime
//!
//! Container engine backends for havoc.
//!
//! [`Runtime`] is the contract the orchestrator drives: list containers,
//! run command sequences in a target's network namespace, start helpers in
//! its cgroup, and change its lifecycle state. Two engines implement it:
//!
//! - [`DockerRuntime`]: the Docker Engine API via bollard
//! - [`ContainerdRuntime`]: containerd via the `ctr` client binary
//!
//! [`DryRunRuntime`] wraps either and only logs side effects;
//! [`MockRuntime`] records calls for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod containerd;
pub mod docker;
pub mod dry_run;
pub mod error;
pub mod exec;
pub mod helper;
pub mod mock;
pub mod runtime;

pub use containerd::ctr::{CtrBinary, CtrExec, CtrOutput};
pub use containerd::ContainerdRuntime;
pub use docker::DockerRuntime;
pub use dry_run::DryRunRuntime;
pub use error::RuntimeError;
pub use exec::{command_line, exec_direct, run_sequence};
pub use helper::HelperGuard;
pub use mock::{MockCall, MockOp, MockRuntime};
pub use runtime::{Engine, ExecOutput, RemoveOptions, Runtime};
