//! Runtime error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a container engine backend.
///
/// These are per-target: the orchestrator records them against the
/// container they happened on and carries on with the others.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Docker API error
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// `ctr` invocation failed
    #[error("ctr {command} failed (exit {exit_code}): {stderr}")]
    Ctr {
        /// Command line passed to `ctr`
        command: String,
        /// Exit status of `ctr`
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Local I/O error (spawning `ctr`)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine returned something we could not interpret
    #[error("engine error: {0}")]
    Engine(String),

    /// Required tool is missing in the target container
    #[error("command {command:?} not found in container {container}")]
    CommandNotFound {
        /// Container the lookup ran in
        container: String,
        /// Missing executable
        command: String,
    },

    /// A command in a sequence exited non-zero
    #[error("command #{index} `{command}` failed in {container}: exit={exit_code}, output={output}")]
    CommandFailed {
        /// Container the command ran in
        container: String,
        /// Position of the failing command in its sequence
        index: usize,
        /// Full command line
        command: String,
        /// Exit code
        exit_code: i64,
        /// Combined stdout and stderr
        output: String,
    },

    /// Helper container could not be created, started or released
    #[error("helper {helper} failed: {reason}")]
    HelperFailed {
        /// Helper container ID or name
        helper: String,
        /// What went wrong
        reason: String,
    },

    /// Target has no running task
    #[error("container {container} is not running ({state})")]
    NotRunning {
        /// Target container
        container: String,
        /// Observed state
        state: String,
    },

    /// Operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Time waited
        after: Duration,
    },
}
