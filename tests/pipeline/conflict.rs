use crate::support::{
    helpers::{assert_ordered, init_tracing},
    mock_beacon::{block_with_deposits, ScriptedBeacon, SLOTS_PER_EPOCH},
};
use anyhow::Result;
use beacontap::deriver::{BlockDeriver, BlockDeriverParams, DepositExtractor, EventDeriver};
use beacontap::{
    BeaconFacade as _, CheckpointIterator, CheckpointIteratorParams, ClientMeta, ClockDrift,
    CoordinatorClient, DecoratedEvent, DeriverSettings, EventKind, MemoryCoordinator,
    NetworkIdentity, Position, Telemetry,
};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const NETWORK_ID: &str = "9";
const LAST_SLOT: u64 = 20;

fn client_meta(name: &str) -> Arc<ClientMeta> {
    Arc::new(ClientMeta {
        id: Uuid::new_v4(),
        name: name.into(),
        version: "0.1.0".into(),
        implementation: "beacontap".into(),
        os: std::env::consts::OS.into(),
        clock_drift_ms: 0,
        network: NetworkIdentity {
            name: "testnet".into(),
            id: 9,
        },
        consensus_implementation: "scripted".into(),
        consensus_version: "0.0.0".into(),
        labels: BTreeMap::new(),
    })
}

fn recording_deriver(
    instance: &str,
    beacon: &Arc<ScriptedBeacon>,
    coordinator: &Arc<MemoryCoordinator>,
    telemetry: Arc<Telemetry>,
) -> (BlockDeriver<DepositExtractor>, Arc<Mutex<Vec<DecoratedEvent>>>) {
    let iterator = CheckpointIterator::new(CheckpointIteratorParams {
        network_name: "testnet".into(),
        network_id: NETWORK_ID.into(),
        kind: EventKind::Deposit,
        coordinator: coordinator.clone(),
        wallclock: beacon.wallclock(),
        beacon: beacon.clone(),
        checkpoint_name: "finalized".into(),
        head_lag_epochs: 0,
        override_start_epoch: None,
        wait_ceiling: Duration::from_millis(100),
        telemetry: telemetry.clone(),
    })
    .with_stop_at(Position::from_slot(LAST_SLOT, SLOTS_PER_EPOCH));

    let mut deriver = BlockDeriver::new(BlockDeriverParams {
        extractor: DepositExtractor,
        iterator,
        beacon: beacon.clone(),
        client_meta: client_meta(instance),
        clock_drift: Arc::new(ClockDrift::default()),
        telemetry,
        settings: DeriverSettings {
            enabled: true,
            head_lag_epochs: 0,
            lookahead_distance: 0,
        },
        network_name: "testnet".into(),
    });

    let received: Arc<Mutex<Vec<DecoratedEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events = received.clone();
    deriver.on_events_derived(Box::new(move |batch| {
        let events = events.clone();
        Box::pin(async move {
            events.lock().expect("events poisoned").extend(batch);
            Ok(())
        })
    }));

    (deriver, received)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_instances_converge_without_gaps() -> Result<()> {
    init_tracing();
    let beacon = ScriptedBeacon::new();
    for slot in 0..=LAST_SLOT {
        beacon.insert_block(block_with_deposits(slot, 1));
    }
    beacon.set_finalized(Position::from_slot(LAST_SLOT, SLOTS_PER_EPOCH));
    beacon.set_ready();

    let coordinator = Arc::new(MemoryCoordinator::new());
    let telemetry_a = Arc::new(Telemetry::default());
    let telemetry_b = Arc::new(Telemetry::default());

    let (mut instance_a, events_a) =
        recording_deriver("instance-a", &beacon, &coordinator, telemetry_a.clone());
    let (mut instance_b, events_b) =
        recording_deriver("instance-b", &beacon, &coordinator, telemetry_b.clone());

    let ctx = CancellationToken::new();
    instance_a.start(ctx.child_token())?;
    instance_b.start(ctx.child_token())?;

    timeout(Duration::from_secs(30), instance_a.stop())
        .await
        .expect("instance a should exhaust")?;
    timeout(Duration::from_secs(30), instance_b.stop())
        .await
        .expect("instance b should exhaust")?;

    // The shared cursor converged exactly one step past the stop slot.
    assert_eq!(
        coordinator
            .get_location(NETWORK_ID, EventKind::Deposit)
            .await?,
        Some(Position::from_slot(LAST_SLOT + 1, SLOTS_PER_EPOCH))
    );

    let events_a = events_a.lock().expect("events poisoned").clone();
    let events_b = events_b.lock().expect("events poisoned").clone();

    // Each instance alone emits strictly increasing positions.
    assert_ordered(&events_a);
    assert_ordered(&events_b);

    // Between them every slot was emitted at least once; duplicates
    // from lost races are acceptable, gaps are not.
    let covered: BTreeSet<u64> = events_a
        .iter()
        .chain(events_b.iter())
        .filter_map(|event| event.position.slot())
        .collect();
    let expected: BTreeSet<u64> = (0..=LAST_SLOT).collect();
    assert_eq!(covered, expected, "every slot must be covered by some instance");

    Ok(())
}
