//! Command sequences shared by both engines.

use havoc_types::Container;
use std::future::Future;
use tracing::debug;

use crate::error::RuntimeError;
use crate::runtime::{ExecOutput, Runtime};

/// Prepend `tool` to an argument vector.
pub fn command_line(tool: &str, args: &[String]) -> Vec<String> {
    std::iter::once(tool.to_string())
        .chain(args.iter().cloned())
        .collect()
}

/// Run `tool` with each argument vector in order, stopping at the first failure.
///
/// `exec` runs one full command line somewhere (the target or a helper) and
/// reports its output. `container` is only used for error reporting.
pub async fn run_sequence<F, Fut>(
    container: &str,
    tool: &str,
    commands: &[Vec<String>],
    mut exec: F,
) -> Result<(), RuntimeError>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<ExecOutput, RuntimeError>>,
{
    for (index, args) in commands.iter().enumerate() {
        let cmd = command_line(tool, args);
        let line = cmd.join(" ");
        debug!(container, command = %line, index, "exec");
        let output = exec(cmd).await?;
        if !output.success() {
            return Err(RuntimeError::CommandFailed {
                container: container.to_string(),
                index,
                command: line,
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }
    }
    Ok(())
}

/// Run a command sequence directly inside the target.
///
/// Checks with `which` that `tool` exists first, then runs each command
/// privileged so it may change network state.
pub async fn exec_direct<R>(
    runtime: &R,
    target: &Container,
    tool: &str,
    commands: &[Vec<String>],
) -> Result<(), RuntimeError>
where
    R: Runtime + ?Sized,
{
    let which = runtime
        .exec_in_container(target, &["which".to_string(), tool.to_string()], false)
        .await?;
    if !which.success() {
        return Err(RuntimeError::CommandNotFound {
            container: target.normalized_name().to_string(),
            command: tool.to_string(),
        });
    }

    run_sequence(target.normalized_name(), tool, commands, |cmd| async move {
        runtime.exec_in_container(target, &cmd, true).await
    })
    .await
}
