//! Connect, schedule, and forward termination signals.

use anyhow::{Context, Result};
use havoc_core::{DisruptionPlan, SelectionPolicy};
use havoc_engine::{Config, RunSummary, ScheduleSettings, Scheduler, Shutdown};
use tokio::signal;
use tracing::{info, warn};

/// Run the plan against the configured engine until it completes or the
/// process is interrupted. Interrupts revert what was applied first.
pub async fn execute(
    config: &Config,
    policy: &SelectionPolicy,
    plan: &DisruptionPlan,
) -> Result<RunSummary> {
    let runtime = config
        .connect()
        .with_context(|| format!("failed to connect to {}", config.runtime.engine))?;

    let shutdown = Shutdown::new();
    let watcher = tokio::spawn(forward_signals(shutdown.clone()));

    info!(
        disruption = plan.disruption().name(),
        engine = %config.runtime.engine,
        dry_run = config.schedule.dry_run,
        "starting"
    );
    let scheduler = Scheduler::new(runtime, ScheduleSettings::from(&config.schedule));
    let result = scheduler.run(policy, plan, &shutdown).await;
    watcher.abort();

    let summary = result?;
    info!(
        ticks = summary.ticks,
        failed_ticks = summary.failed_ticks,
        interrupted = shutdown.is_triggered(),
        "finished"
    );
    Ok(summary)
}

async fn forward_signals(shutdown: Shutdown) {
    termination().await;
    warn!("termination requested, reverting applied faults");
    shutdown.trigger();
}

async fn termination() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
