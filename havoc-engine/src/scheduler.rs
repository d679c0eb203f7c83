//! Recurring driver.
//!
//! Each tick re-resolves targets (the fleet may have changed), reuses the
//! already-validated plan and runs one batch. A zero interval runs exactly
//! one tick.

use havoc_core::{DisruptionPlan, SelectionPolicy};
use havoc_runtime::{DryRunRuntime, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::ScheduleConfig;
use crate::error::EngineError;
use crate::orchestrator::{BatchReport, Orchestrator, DEFAULT_REVERT_TIMEOUT};
use crate::resolver::resolve_targets;
use crate::shutdown::Shutdown;

/// Scheduling settings.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    /// Time between ticks; zero runs once.
    pub interval: Duration,
    /// Keep going after a failed batch.
    pub skip_error: bool,
    /// Replace the runtime with a logging no-op.
    pub dry_run: bool,
    /// Independent per-target clocks instead of one synchronized batch.
    pub per_target: bool,
    /// Bound on each revert.
    pub revert_timeout: Duration,
    /// Consider stopped containers too.
    pub all: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            skip_error: false,
            dry_run: false,
            per_target: false,
            revert_timeout: DEFAULT_REVERT_TIMEOUT,
            all: false,
        }
    }
}

impl From<&ScheduleConfig> for ScheduleSettings {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            interval: config.interval,
            skip_error: config.skip_error,
            dry_run: config.dry_run,
            per_target: config.per_target,
            revert_timeout: config.revert_timeout,
            all: false,
        }
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Ticks whose batch had a failure (only possible with skip-error).
    pub failed_ticks: u64,
}

/// Drives batches on an interval until done or shut down.
pub struct Scheduler {
    orchestrator: Orchestrator,
    settings: ScheduleSettings,
}

impl Scheduler {
    /// Create a scheduler. With `dry_run`, `runtime` is wrapped so nothing
    /// is changed; the rest of the flow is identical.
    pub fn new(runtime: Arc<dyn Runtime>, settings: ScheduleSettings) -> Self {
        let runtime: Arc<dyn Runtime> = if settings.dry_run {
            info!(engine = %runtime.engine(), "dry run: no container will be changed");
            Arc::new(DryRunRuntime::new(runtime))
        } else {
            runtime
        };
        Self {
            orchestrator: Orchestrator::new(runtime, settings.revert_timeout),
            settings,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    /// Resolve targets and run one batch.
    ///
    /// Selection errors are returned; per-target failures are in the report.
    pub async fn tick(
        &self,
        policy: &SelectionPolicy,
        plan: &DisruptionPlan,
        shutdown: &Shutdown,
    ) -> Result<BatchReport, EngineError> {
        let runtime = self.orchestrator.runtime().as_ref();
        let targets = resolve_targets(runtime, policy, self.settings.all).await?;
        if targets.is_empty() {
            return Ok(BatchReport::default());
        }
        let report = if self.settings.per_target {
            self.orchestrator.run_per_target(targets, plan, shutdown).await
        } else {
            self.orchestrator.run_batch(targets, plan, shutdown).await
        };
        Ok(report)
    }

    /// Tick until the interval is zero, an error stops the loop, or
    /// `shutdown` fires.
    pub async fn run(
        &self,
        policy: &SelectionPolicy,
        plan: &DisruptionPlan,
        shutdown: &Shutdown,
    ) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();

        if self.settings.interval.is_zero() {
            let report = self.tick(policy, plan, shutdown).await?;
            self.record(&report, &mut summary)?;
            return Ok(summary);
        }

        info!(interval = ?self.settings.interval, "starting recurring run");
        let mut timer = interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(ticks = summary.ticks, "shutdown requested, stopping");
                    break;
                }
                _ = timer.tick() => {}
            }
            let report = self.tick(policy, plan, shutdown).await?;
            self.record(&report, &mut summary)?;
        }
        Ok(summary)
    }

    fn record(&self, report: &BatchReport, summary: &mut RunSummary) -> Result<(), EngineError> {
        summary.ticks += 1;
        let Some(error) = report.error() else {
            return Ok(());
        };
        summary.failed_ticks += 1;
        if !self.settings.skip_error {
            return Err(error);
        }
        warn!(error = %error, "batch failed, continuing (skip-error)");
        Ok(())
    }
}
