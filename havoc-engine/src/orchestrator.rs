//! Concurrent apply/revert over a set of targets.
//!
//! Each target moves through `Idle → Applying → Applied → Reverting →
//! Reverted`, or ends in `Failed`. A target whose apply failed is never
//! reverted; one whose revert failed ends `Failed` but keeps its apply
//! result.
//!
//! Reverts run on their own tasks under [`Orchestrator::revert_timeout`]
//! and never observe the shutdown signal that may have triggered them.

use futures_util::future::join_all;
use havoc_core::DisruptionPlan;
use havoc_runtime::{Runtime, RuntimeError};
use havoc_types::Container;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::action::{self, Applied};
use crate::error::EngineError;
use crate::shutdown::Shutdown;

/// Default bound on a single revert.
pub const DEFAULT_REVERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-target lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Not started.
    Idle,
    /// Apply in flight.
    Applying,
    /// Applied and not (yet) reverted.
    Applied,
    /// Revert in flight.
    Reverting,
    /// Applied then reverted.
    Reverted,
    /// Apply or revert failed.
    Failed,
}

impl TargetState {
    /// Get the state as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Reverting => "reverting",
            Self::Reverted => "reverted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one target.
#[derive(Debug)]
pub struct TargetOutcome {
    /// The target.
    pub container: Container,
    /// Final state.
    pub state: TargetState,
    /// Apply error, if the apply failed.
    pub apply_error: Option<RuntimeError>,
    /// Revert error, if the revert failed.
    pub revert_error: Option<RuntimeError>,
}

impl TargetOutcome {
    fn new(container: Container) -> Self {
        Self {
            container,
            state: TargetState::Idle,
            apply_error: None,
            revert_error: None,
        }
    }

    fn apply_failed(&mut self, error: RuntimeError) {
        warn!(container = %self.container, error = %error, "apply failed");
        self.state = TargetState::Failed;
        self.apply_error = Some(error);
    }

    fn revert_finished(&mut self, result: Result<(), RuntimeError>) {
        match result {
            Ok(()) => {
                debug!(container = %self.container, "reverted");
                self.state = TargetState::Reverted;
            }
            Err(error) => {
                warn!(container = %self.container, error = %error, "revert failed");
                self.state = TargetState::Failed;
                self.revert_error = Some(error);
            }
        }
    }

    /// True if neither apply nor revert failed.
    pub fn is_success(&self) -> bool {
        self.apply_error.is_none() && self.revert_error.is_none()
    }
}

/// Result of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<TargetOutcome>,
    cancelled: bool,
}

impl BatchReport {
    /// Per-target outcomes, in target order.
    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    /// True if the batch had no targets.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True if the hold was cut short by shutdown.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True if every target succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TargetOutcome::is_success)
    }

    /// Number of targets with an apply or revert error.
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// First apply error, in target order.
    pub fn first_error(&self) -> Option<&RuntimeError> {
        self.outcomes.iter().find_map(|o| o.apply_error.as_ref())
    }

    /// Last revert error, in target order.
    pub fn last_revert_error(&self) -> Option<&RuntimeError> {
        self.outcomes
            .iter()
            .rev()
            .find_map(|o| o.revert_error.as_ref())
    }

    /// Summarise failures as an [`EngineError::Batch`].
    pub fn error(&self) -> Option<EngineError> {
        if self.is_success() {
            return None;
        }
        let first = self
            .first_error()
            .or_else(|| self.last_revert_error())
            .map(ToString::to_string)
            .unwrap_or_default();
        Some(EngineError::Batch {
            failed: self.failed_count(),
            total: self.outcomes.len(),
            first,
        })
    }
}

/// Applies a plan to many targets at once and reverts them.
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn Runtime>,
    revert_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator over `runtime`.
    pub fn new(runtime: Arc<dyn Runtime>, revert_timeout: Duration) -> Self {
        Self {
            runtime,
            revert_timeout,
        }
    }

    /// The runtime driven by this orchestrator.
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Bound on each revert.
    pub fn revert_timeout(&self) -> Duration {
        self.revert_timeout
    }

    /// Apply to all targets concurrently, hold, then revert together.
    ///
    /// One target failing never stops the others. The hold ends when the
    /// plan's duration elapses, when `shutdown` fires, or once every applied
    /// disruption has ended by itself (all stress helpers exited). Shutdown
    /// during the applies skips the hold but still reverts.
    pub async fn run_batch(
        &self,
        targets: Vec<Container>,
        plan: &DisruptionPlan,
        shutdown: &Shutdown,
    ) -> BatchReport {
        let disruption = plan.disruption();
        info!(targets = targets.len(), disruption = disruption.name(), "applying batch");

        let mut outcomes: Vec<TargetOutcome> =
            targets.iter().cloned().map(TargetOutcome::new).collect();
        let mut applies = JoinSet::new();
        for (index, target) in targets.into_iter().enumerate() {
            outcomes[index].state = TargetState::Applying;
            let runtime = self.runtime.clone();
            let disruption = disruption.clone();
            applies.spawn(async move {
                let result = action::apply(runtime.as_ref(), &target, &disruption).await;
                (index, result)
            });
        }

        let mut to_revert: Vec<(usize, Applied)> = Vec::new();
        while let Some(joined) = applies.join_next().await {
            match joined {
                Ok((index, Ok(applied))) => {
                    info!(container = %applied.target(), disruption = disruption.name(), "applied");
                    outcomes[index].state = TargetState::Applied;
                    if applied.needs_revert() {
                        to_revert.push((index, applied));
                    }
                }
                Ok((index, Err(error))) => outcomes[index].apply_failed(error),
                Err(error) => warn!(error = %error, "apply task failed"),
            }
        }
        for outcome in outcomes
            .iter_mut()
            .filter(|o| o.state == TargetState::Applying)
        {
            outcome.apply_failed(RuntimeError::Engine("apply task panicked".into()));
        }

        let mut cancelled = false;
        if !to_revert.is_empty() {
            if let Some(duration) = plan.duration() {
                let ended = join_all(to_revert.iter().map(|(_, applied)| applied.ended()));
                cancelled = hold(duration, shutdown, ended).await;
            }
            self.revert_all(to_revert, &mut outcomes).await;
        }

        BatchReport {
            outcomes,
            cancelled,
        }
    }

    /// Like [`run_batch`](Self::run_batch), but every target runs its own
    /// apply → hold → revert cycle with an independent clock.
    pub async fn run_per_target(
        &self,
        targets: Vec<Container>,
        plan: &DisruptionPlan,
        shutdown: &Shutdown,
    ) -> BatchReport {
        info!(targets = targets.len(), disruption = plan.disruption().name(), "applying per target");

        let mut outcomes: Vec<TargetOutcome> =
            targets.iter().cloned().map(TargetOutcome::new).collect();
        let mut tasks = JoinSet::new();
        for (index, target) in targets.into_iter().enumerate() {
            outcomes[index].state = TargetState::Applying;
            let this = self.clone();
            let plan = plan.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let outcome = this.run_one(target, &plan, &shutdown).await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(error) => warn!(error = %error, "target task failed"),
            }
        }
        for outcome in outcomes
            .iter_mut()
            .filter(|o| o.state == TargetState::Applying)
        {
            outcome.apply_failed(RuntimeError::Engine("target task panicked".into()));
        }

        BatchReport {
            outcomes,
            cancelled: shutdown.is_triggered(),
        }
    }

    async fn run_one(
        &self,
        target: Container,
        plan: &DisruptionPlan,
        shutdown: &Shutdown,
    ) -> TargetOutcome {
        let mut outcome = TargetOutcome::new(target);
        outcome.state = TargetState::Applying;
        let applied =
            match action::apply(self.runtime.as_ref(), &outcome.container, plan.disruption()).await
            {
                Ok(applied) => applied,
                Err(error) => {
                    outcome.apply_failed(error);
                    return outcome;
                }
            };
        info!(container = %outcome.container, disruption = plan.disruption().name(), "applied");
        outcome.state = TargetState::Applied;
        if !applied.needs_revert() {
            return outcome;
        }

        if let Some(duration) = plan.duration() {
            hold(duration, shutdown, applied.ended()).await;
        }
        outcome.state = TargetState::Reverting;
        let revert = tokio::spawn(revert_bounded(
            self.runtime.clone(),
            applied,
            self.revert_timeout,
        ));
        outcome.revert_finished(flatten(revert.await));
        outcome
    }

    async fn revert_all(&self, to_revert: Vec<(usize, Applied)>, outcomes: &mut [TargetOutcome]) {
        info!(targets = to_revert.len(), "reverting");
        let mut indices = Vec::with_capacity(to_revert.len());
        let mut reverts = Vec::with_capacity(to_revert.len());
        for (index, applied) in to_revert {
            outcomes[index].state = TargetState::Reverting;
            indices.push(index);
            // Spawned so that dropping this future cannot abort a revert
            reverts.push(tokio::spawn(revert_bounded(
                self.runtime.clone(),
                applied,
                self.revert_timeout,
            )));
        }
        for (index, joined) in indices.into_iter().zip(join_all(reverts).await) {
            outcomes[index].revert_finished(flatten(joined));
        }
    }
}

/// Wait out `duration` unless shutdown fires or the disruption `ended`
/// first. Returns true if cut short by shutdown.
async fn hold(
    duration: Duration,
    shutdown: &Shutdown,
    ended: impl Future,
) -> bool {
    debug!(?duration, "holding disruption");
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = ended => {
            info!("disruption ended on its own, reverting early");
            false
        }
        _ = shutdown.cancelled() => {
            info!("shutdown requested, reverting early");
            true
        }
    }
}

async fn revert_bounded(
    runtime: Arc<dyn Runtime>,
    applied: Applied,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    let name = applied.target().normalized_name().to_string();
    match tokio::time::timeout(timeout, action::revert(runtime.as_ref(), applied)).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout {
            operation: format!("revert on {name}"),
            after: timeout,
        }),
    }
}

fn flatten(
    joined: Result<Result<(), RuntimeError>, tokio::task::JoinError>,
) -> Result<(), RuntimeError> {
    joined.unwrap_or_else(|e| Err(RuntimeError::Engine(format!("revert task failed: {e}"))))
}
