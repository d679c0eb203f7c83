//! Faults against a real Docker daemon.
//!
//! Every test here needs `/var/run/docker.sock` and network access to pull
//! images, so they are ignored by default:
//!
//! ```bash
//! cargo test -p havoc-e2e -- --ignored
//! ```

use havoc_core::{
    Disruption, DisruptionPlan, HelperImage, LossMode, NetemCommand, NetemSpec, PacketFilter,
    PacketLossSpec, Protocol, Signal, StressSpec, TrafficFilter,
};
use havoc_runtime::RuntimeError;
use havoc_e2e::{E2eHarness, TargetSpec, IDLE_IMAGE, TOOLS_IMAGE};
use havoc_engine::{ScheduleSettings, Scheduler, Shutdown};
use havoc_types::SKIP_LABEL;
use serial_test::serial;
use std::time::Duration;

fn once() -> ScheduleSettings {
    ScheduleSettings::default()
}

fn delay_spec() -> NetemSpec {
    NetemSpec::new(
        "eth0",
        NetemCommand::Delay {
            time_ms: 200,
            jitter_ms: 0,
            correlation: 0.0,
            distribution: None,
        },
        TrafficFilter::default(),
    )
    .unwrap()
}

#[tokio::test]
#[ignore]
#[serial]
async fn pause_is_reverted_after_duration() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&["web"]).unwrap();
    let plan =
        DisruptionPlan::new(Disruption::Pause, Some(Duration::from_secs(3)), Duration::ZERO).unwrap();

    let run = tokio::spawn({
        let shutdown = Shutdown::new();
        async move { scheduler.run(&policy, &plan, &shutdown).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.state(&web).await.unwrap(), "paused");

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.ticks, 1);
    assert_eq!(harness.state(&web).await.unwrap(), "running");

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn shutdown_reverts_early() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&[]).unwrap();
    let plan = DisruptionPlan::new(Disruption::Pause, Some(Duration::from_secs(600)), Duration::ZERO)
        .unwrap();
    let shutdown = Shutdown::new();

    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(&policy, &plan, &shutdown).await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.state(&web).await.unwrap(), "paused");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("revert should not wait for the full duration")
        .unwrap()
        .unwrap();
    assert_eq!(harness.state(&web).await.unwrap(), "running");

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn skip_label_is_respected() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();
    let skipped = harness
        .spawn(TargetSpec::new("skipped", IDLE_IMAGE).label(SKIP_LABEL, "true"))
        .await
        .unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&[]).unwrap();
    let plan = DisruptionPlan::new(
        Disruption::Kill {
            signal: Signal::KILL,
        },
        None,
        Duration::ZERO,
    )
    .unwrap();
    scheduler.run(&policy, &plan, &Shutdown::new()).await.unwrap();

    assert_eq!(harness.state(&web).await.unwrap(), "exited");
    assert_eq!(harness.state(&skipped).await.unwrap(), "running");

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn stop_with_restart_starts_again() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&["web"]).unwrap();
    let plan = DisruptionPlan::new(
        Disruption::Stop {
            timeout: Duration::from_secs(1),
            restart: true,
        },
        Some(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .unwrap();
    scheduler.run(&policy, &plan, &Shutdown::new()).await.unwrap();

    assert_eq!(harness.state(&web).await.unwrap(), "running");
    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn remove_deletes_container() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&["web"]).unwrap();
    let plan = DisruptionPlan::new(
        Disruption::Remove {
            force: true,
            links: false,
            volumes: true,
        },
        None,
        Duration::ZERO,
    )
    .unwrap();
    scheduler.run(&policy, &plan, &Shutdown::new()).await.unwrap();

    assert!(!harness.exists(&web).await);
    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn netem_direct_is_applied_and_cleared() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness
        .spawn(TargetSpec::new("web", TOOLS_IMAGE).cap_add("NET_ADMIN"))
        .await
        .unwrap();

    let runtime = harness.runtime();
    let targets = havoc_engine::resolve_targets(runtime.as_ref(), &harness.policy(&["web"]).unwrap(), false)
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);

    let disruption = Disruption::Netem {
        spec: delay_spec(),
        helper: None,
    };
    let applied = havoc_engine::apply(runtime.as_ref(), &targets[0], &disruption)
        .await
        .unwrap();
    assert!(harness.qdisc(&web, "eth0").await.unwrap().contains("netem"));

    havoc_engine::revert(runtime.as_ref(), applied).await.unwrap();
    assert!(!harness.qdisc(&web, "eth0").await.unwrap().contains("netem"));

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn netem_through_helper_leaves_no_sidecar() {
    let mut harness = E2eHarness::new().unwrap();
    // No NET_ADMIN on the target: the helper carries the capability
    let web = harness.spawn(TargetSpec::new("web", TOOLS_IMAGE)).await.unwrap();

    let scheduler = Scheduler::new(harness.runtime(), once());
    let policy = harness.policy(&["web"]).unwrap();
    let plan = DisruptionPlan::new(
        Disruption::Netem {
            spec: delay_spec(),
            helper: Some(HelperImage::new(TOOLS_IMAGE)),
        },
        Some(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .unwrap();
    scheduler.run(&policy, &plan, &Shutdown::new()).await.unwrap();

    assert!(!harness.qdisc(&web, "eth0").await.unwrap().contains("netem"));
    let leftovers = harness
        .runtime()
        .list_containers(&havoc_types::ListOptions {
            all: true,
            labels: vec![format!("{SKIP_LABEL}=true")],
        })
        .await
        .unwrap();
    assert!(
        leftovers.iter().all(|c| !c.name().contains("havoc_net_")),
        "helpers left behind: {leftovers:?}"
    );

    harness.teardown().await.unwrap();
}

async fn helper_leftovers(harness: &E2eHarness, prefix: &str) -> Vec<String> {
    harness
        .runtime()
        .list_containers(&havoc_types::ListOptions {
            all: true,
            labels: vec![format!("{SKIP_LABEL}=true")],
        })
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name().to_string())
        .filter(|name| name.contains(prefix))
        .collect()
}

#[tokio::test]
#[ignore]
#[serial]
async fn failing_stressor_is_reported_on_revert() {
    let mut harness = E2eHarness::new().unwrap();
    harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();

    let runtime = harness.runtime();
    let targets = havoc_engine::resolve_targets(runtime.as_ref(), &harness.policy(&["web"]).unwrap(), false)
        .await
        .unwrap();
    let spec = StressSpec::new("--cpux 2", None, true).unwrap();
    let applied = havoc_engine::apply(runtime.as_ref(), &targets[0], &Disruption::Stress(spec))
        .await
        .unwrap();

    // stress-ng rejects the stressor and exits long before the hold would end
    tokio::time::timeout(Duration::from_secs(60), applied.ended())
        .await
        .expect("helper should exit on its own");
    let err = havoc_engine::revert(runtime.as_ref(), applied)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::HelperFailed { .. }), "{err}");
    assert!(helper_leftovers(&harness, "havoc_stress_").await.is_empty());

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn helper_that_cannot_start_is_removed() {
    let mut harness = E2eHarness::new().unwrap();
    harness.spawn(TargetSpec::new("web", IDLE_IMAGE)).await.unwrap();
    harness.ensure_image(TOOLS_IMAGE).await.unwrap();

    let runtime = harness.runtime();
    let targets = havoc_engine::resolve_targets(runtime.as_ref(), &harness.policy(&["web"]).unwrap(), false)
        .await
        .unwrap();
    // No `dockhack` in this image, so the helper is created but never starts
    let spec = StressSpec::new("--cpu 1", Some(TOOLS_IMAGE.to_string()), false).unwrap();
    let err = havoc_engine::apply(runtime.as_ref(), &targets[0], &Disruption::Stress(spec))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::HelperFailed { .. }), "{err}");
    assert!(helper_leftovers(&harness, "havoc_stress_").await.is_empty());

    harness.teardown().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn iptables_loss_rule_is_removed() {
    let mut harness = E2eHarness::new().unwrap();
    let web = harness
        .spawn(TargetSpec::new("web", TOOLS_IMAGE).cap_add("NET_ADMIN"))
        .await
        .unwrap();

    let runtime = harness.runtime();
    let targets = havoc_engine::resolve_targets(runtime.as_ref(), &harness.policy(&["web"]).unwrap(), false)
        .await
        .unwrap();
    let spec = PacketLossSpec::new(
        "eth0",
        Protocol::Tcp,
        LossMode::Random { probability: 0.5 },
        PacketFilter::parse(&[], &[], &[], &[8080]).unwrap(),
    )
    .unwrap();
    let applied = havoc_engine::apply(
        runtime.as_ref(),
        &targets[0],
        &Disruption::PacketLoss { spec, helper: None },
    )
    .await
    .unwrap();
    assert!(harness.input_rules(&web).await.unwrap().contains("DROP"));

    havoc_engine::revert(runtime.as_ref(), applied).await.unwrap();
    assert!(!harness.input_rules(&web).await.unwrap().contains("DROP"));

    harness.teardown().await.unwrap();
}
