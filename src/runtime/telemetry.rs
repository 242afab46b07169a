use crate::event::kind::EventKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters for the harvest pipeline.
#[derive(Default, Debug)]
pub struct Telemetry {
    derived_events: AtomicU64,
    missing_slots: AtomicU64,
    decode_errors: AtomicU64,
    sink_errors: AtomicU64,
    cas_conflicts: AtomicU64,
    coordinator_errors: AtomicU64,
    beacon_errors: AtomicU64,
    locations: Mutex<BTreeMap<EventKind, u64>>,
}

impl Telemetry {
    pub fn record_derived_events(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.derived_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_missing_slot(&self) {
        self.missing_slots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_conflict(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coordinator_error(&self) {
        self.coordinator_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_beacon_error(&self) {
        self.beacon_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest committed cursor, numeric form, per deriver.
    pub fn set_location(&self, kind: EventKind, location: u64) {
        self.locations
            .lock()
            .expect("telemetry locations poisoned")
            .insert(kind, location);
    }

    pub fn location(&self, kind: EventKind) -> Option<u64> {
        self.locations
            .lock()
            .expect("telemetry locations poisoned")
            .get(&kind)
            .copied()
    }

    pub fn derived_events(&self) -> u64 {
        self.derived_events.load(Ordering::Relaxed)
    }

    pub fn missing_slots(&self) -> u64 {
        self.missing_slots.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }

    pub fn cas_conflicts(&self) -> u64 {
        self.cas_conflicts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            derived_events: self.derived_events.load(Ordering::Relaxed),
            missing_slots: self.missing_slots.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            coordinator_errors: self.coordinator_errors.load(Ordering::Relaxed),
            beacon_errors: self.beacon_errors.load(Ordering::Relaxed),
            locations: self
                .locations
                .lock()
                .expect("telemetry locations poisoned")
                .clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub derived_events: u64,
    pub missing_slots: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    pub cas_conflicts: u64,
    pub coordinator_errors: u64,
    pub beacon_errors: u64,
    pub locations: BTreeMap<EventKind, u64>,
}

/// Spawns a background task that periodically logs event throughput and
/// pipeline error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "beacontap::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let derived_delta = current_snapshot
                        .derived_events
                        .saturating_sub(last_snapshot.derived_events);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        derived_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "beacontap::metrics",
                        throughput = format!("{throughput:.2}"),
                        derived = current_snapshot.derived_events,
                        missing_slots = current_snapshot.missing_slots,
                        decode_errors = current_snapshot.decode_errors,
                        sink_errors = current_snapshot.sink_errors,
                        cas_conflicts = current_snapshot.cas_conflicts,
                        coordinator_errors = current_snapshot.coordinator_errors,
                        beacon_errors = current_snapshot.beacon_errors,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
