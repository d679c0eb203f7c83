//! Applying one disruption to one container, and undoing it.
//!
//! [`apply`] returns an [`Applied`] token describing how to undo what it
//! did; [`revert`] consumes it. One-shot disruptions produce a token with
//! nothing to undo.

use havoc_core::{Disruption, HelperImage, IPTABLES, TC};
use havoc_runtime::{command_line, HelperGuard, RemoveOptions, Runtime, RuntimeError};
use havoc_types::Container;
use tracing::{debug, info};

/// How to undo an applied disruption.
#[derive(Debug)]
pub enum Undo {
    /// Nothing to undo (one-shot disruption).
    Nothing,
    /// Run a command sequence in the target's network namespace.
    Network {
        /// Executable (`tc` or `iptables`).
        tool: &'static str,
        /// Optional sidecar image.
        helper: Option<HelperImage>,
        /// Revert argument vectors.
        commands: Vec<Vec<String>>,
    },
    /// Release a helper running in the target's cgroup.
    Helper(HelperGuard),
    /// Unpause the target.
    Unpause,
    /// Start the target again.
    Start,
}

/// Proof that a disruption was applied to a container.
#[derive(Debug)]
pub struct Applied {
    target: Container,
    undo: Undo,
}

impl Applied {
    /// The container the disruption was applied to.
    pub fn target(&self) -> &Container {
        &self.target
    }

    /// What [`revert`] will do.
    pub fn undo(&self) -> &Undo {
        &self.undo
    }

    /// True if [`revert`] has something to do.
    pub fn needs_revert(&self) -> bool {
        !matches!(self.undo, Undo::Nothing)
    }

    /// Resolve once the disruption has stopped by itself.
    ///
    /// Only a helper can finish on its own; everything else stays in effect
    /// until reverted, so this never resolves for them.
    pub async fn ended(&self) {
        match &self.undo {
            Undo::Helper(guard) => guard.exited().await,
            _ => std::future::pending().await,
        }
    }
}

/// Apply `disruption` to `target`.
pub async fn apply(
    runtime: &dyn Runtime,
    target: &Container,
    disruption: &Disruption,
) -> Result<Applied, RuntimeError> {
    debug!(container = %target, disruption = disruption.name(), "applying");
    let undo = match disruption {
        Disruption::Netem { spec, helper } => {
            info!(container = %target, iface = spec.interface(), netem = spec.command().name(), "netem");
            runtime
                .exec_in_network_context(target, helper.as_ref(), TC, &spec.apply_commands())
                .await?;
            Undo::Network {
                tool: TC,
                helper: helper.clone(),
                commands: spec.revert_commands(),
            }
        }
        Disruption::PacketLoss { spec, helper } => {
            info!(container = %target, iface = spec.interface(), "iptables loss");
            runtime
                .exec_in_network_context(target, helper.as_ref(), IPTABLES, &spec.apply_commands())
                .await?;
            Undo::Network {
                tool: IPTABLES,
                helper: helper.clone(),
                commands: spec.revert_commands(),
            }
        }
        Disruption::Stress(spec) => {
            let helper = HelperImage {
                image: spec.image().to_string(),
                pull: spec.pull(),
            };
            info!(container = %target, stressors = %spec.stressors().join(" "), "stress");
            let guard = runtime
                .exec_in_cgroup_context(target, &helper, &spec.command())
                .await?;
            Undo::Helper(guard)
        }
        Disruption::Pause => {
            runtime.pause(target).await?;
            Undo::Unpause
        }
        Disruption::Stop { timeout, restart } => {
            runtime.stop(target, *timeout).await?;
            if *restart {
                Undo::Start
            } else {
                Undo::Nothing
            }
        }
        Disruption::Kill { signal } => {
            runtime.kill(target, signal).await?;
            Undo::Nothing
        }
        Disruption::Remove {
            force,
            links,
            volumes,
        } => {
            let opts = RemoveOptions {
                force: *force,
                links: *links,
                volumes: *volumes,
            };
            runtime.remove(target, opts).await?;
            Undo::Nothing
        }
        Disruption::Restart { timeout } => {
            runtime.restart(target, *timeout).await?;
            Undo::Nothing
        }
        Disruption::Exec { command, args } => {
            let cmd = command_line(command, args);
            info!(container = %target, command = %cmd.join(" "), "exec");
            let output = runtime.exec_in_container(target, &cmd, false).await?;
            if !output.success() {
                return Err(RuntimeError::CommandFailed {
                    container: target.normalized_name().to_string(),
                    index: 0,
                    command: cmd.join(" "),
                    exit_code: output.exit_code,
                    output: output.combined(),
                });
            }
            Undo::Nothing
        }
    };
    Ok(Applied {
        target: target.clone(),
        undo,
    })
}

/// Undo an applied disruption.
pub async fn revert(runtime: &dyn Runtime, applied: Applied) -> Result<(), RuntimeError> {
    let Applied { target, undo } = applied;
    match undo {
        Undo::Nothing => Ok(()),
        Undo::Network {
            tool,
            helper,
            commands,
        } => {
            info!(container = %target, tool, "reverting network change");
            runtime
                .exec_in_network_context(&target, helper.as_ref(), tool, &commands)
                .await
        }
        Undo::Helper(guard) => {
            info!(container = %target, helper = guard.id(), "stopping stress helper");
            runtime.release_helper(guard).await
        }
        Undo::Unpause => runtime.unpause(&target).await,
        Undo::Start => runtime.start(&target).await,
    }
}
