use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_for_cursor, wait_until},
    mock_beacon::{block_with_deposits, ScriptedBeacon, SLOTS_PER_EPOCH},
    sinks::RecordingSink,
};
use anyhow::Result;
use beacontap::{
    CoordinatorClient, DeriverSettings, EventKind, Harvester, HarvesterConfig, MemoryCoordinator,
    Position, Runner,
};
use tokio::time::{sleep, timeout};

const NETWORK_ID: &str = "9";

fn deposit_only_config() -> HarvesterConfig {
    let mut builder = HarvesterConfig::builder()
        .name("harvester-runner")
        .coordinator_addr("coordinator:8080")
        .beacon_node_addr("http://localhost:5052")
        .metrics_interval(Duration::from_millis(50))
        .wait_ceiling(Duration::from_millis(100));
    for kind in EventKind::ALL {
        builder = builder.deriver(
            kind,
            DeriverSettings {
                enabled: kind == EventKind::Deposit,
                head_lag_epochs: 0,
                lookahead_distance: 0,
            },
        );
    }
    builder.build().expect("config should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_mid_fetch_resumes_at_the_same_position() -> Result<()> {
    init_tracing();
    let beacon = ScriptedBeacon::new();
    beacon.fill_empty_chain(3, &[]);
    beacon.insert_block(block_with_deposits(1, 1));
    beacon.set_finalized(Position::from_slot(3, SLOTS_PER_EPOCH));
    beacon.stall_slot(1);
    beacon.set_ready();

    let coordinator = Arc::new(MemoryCoordinator::new());
    let first_sink = RecordingSink::new("first-run");
    let mut harvester = Harvester::new(
        deposit_only_config(),
        beacon.clone(),
        coordinator.clone(),
        vec![first_sink.clone()],
        None,
    );

    harvester.start().await?;
    wait_for_cursor(
        coordinator.as_ref(),
        NETWORK_ID,
        EventKind::Deposit,
        Position::from_slot(1, SLOTS_PER_EPOCH),
        Duration::from_secs(10),
    )
    .await?;
    // Slot 0 committed; the fetch of slot 1 is now hanging.
    wait_until("stalled fetch in flight", Duration::from_secs(5), || {
        beacon.fetches() >= 2
    })
    .await?;

    timeout(Duration::from_secs(10), harvester.stop())
        .await
        .expect("shutdown must not wait for the stalled fetch")?;

    // The stalled position was never committed and nothing was emitted.
    assert_eq!(
        coordinator
            .get_location(NETWORK_ID, EventKind::Deposit)
            .await?,
        Some(Position::from_slot(1, SLOTS_PER_EPOCH))
    );
    assert_eq!(first_sink.event_count(), 0);

    // Restart against the same coordinator; the walk resumes exactly
    // where it left off.
    beacon.heal_slot(1);
    let second_sink = RecordingSink::new("second-run");
    let mut harvester = Harvester::new(
        deposit_only_config(),
        beacon.clone(),
        coordinator.clone(),
        vec![second_sink.clone()],
        None,
    );
    harvester.start().await?;
    wait_for_cursor(
        coordinator.as_ref(),
        NETWORK_ID,
        EventKind::Deposit,
        Position::from_slot(4, SLOTS_PER_EPOCH),
        Duration::from_secs(10),
    )
    .await?;
    harvester.stop().await?;

    let events = second_sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].position, Position::from_slot(1, SLOTS_PER_EPOCH));
    assert!(
        events
            .iter()
            .all(|event| event.position >= Position::from_slot(1, SLOTS_PER_EPOCH)),
        "nothing before the stored cursor may be re-emitted"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_restart_after_stop() -> Result<()> {
    init_tracing();
    let beacon = ScriptedBeacon::new();
    beacon.fill_empty_chain(6, &[]);
    beacon.insert_block(block_with_deposits(5, 1));
    beacon.set_finalized(Position::from_slot(6, SLOTS_PER_EPOCH));
    beacon.set_ready();

    let coordinator = Arc::new(MemoryCoordinator::new());
    let sink = RecordingSink::new("recording");
    let harvester = Harvester::new(
        deposit_only_config(),
        beacon.clone(),
        coordinator.clone(),
        vec![sink.clone()],
        None,
    );
    let mut runner = Runner::new(harvester);

    runner.start().await?;
    wait_for_cursor(
        coordinator.as_ref(),
        NETWORK_ID,
        EventKind::Deposit,
        Position::from_slot(3, SLOTS_PER_EPOCH),
        Duration::from_secs(10),
    )
    .await?;
    runner.stop().await?;

    runner.start().await?;
    wait_for_cursor(
        coordinator.as_ref(),
        NETWORK_ID,
        EventKind::Deposit,
        Position::from_slot(7, SLOTS_PER_EPOCH),
        Duration::from_secs(10),
    )
    .await?;
    runner.stop().await?;

    let events = sink.events();
    assert!(!events.is_empty(), "the deposit at slot 5 arrives at least once");
    assert!(events
        .iter()
        .all(|event| event.position == Position::from_slot(5, SLOTS_PER_EPOCH)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_when_the_shutdown_token_is_cancelled() -> Result<()> {
    init_tracing();
    let beacon = ScriptedBeacon::new();
    beacon.fill_empty_chain(1, &[]);
    beacon.set_finalized(Position::from_slot(1, SLOTS_PER_EPOCH));
    beacon.set_ready();

    let coordinator = Arc::new(MemoryCoordinator::new());
    let sink = RecordingSink::new("recording");
    let harvester = Harvester::new(
        deposit_only_config(),
        beacon.clone(),
        coordinator.clone(),
        vec![sink.clone()],
        None,
    );
    let mut runner = Runner::new(harvester);
    let token = runner.cancellation_token();

    let handle = tokio::spawn(async move { runner.run_until_shutdown().await });
    sleep(Duration::from_millis(200)).await;
    token.cancel();

    timeout(Duration::from_secs(10), handle)
        .await
        .expect("runner should exit promptly")
        .expect("runner task should not panic")?;

    assert!(sink.was_stopped(), "sinks are drained during shutdown");
    Ok(())
}
