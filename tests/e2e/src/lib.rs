//! # havoc-e2e
//!
//! End-to-end harness for havoc.
//!
//! Spins up short-lived containers on the local Docker daemon, each labelled
//! with a per-run ID so selection never reaches anything else, and offers
//! probes (exec, state) to assert what a fault did and that it was undone.
//!
//! The tests under `tests/` need a daemon and are `#[ignore]`d; run them with
//! `cargo test -p havoc-e2e -- --ignored`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;

pub use harness::{E2eHarness, ExecResult, HarnessError, TargetSpec, IDLE_IMAGE, TOOLS_IMAGE};
