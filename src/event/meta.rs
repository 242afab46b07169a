use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Network identity as reported by the attached beacon node, possibly
/// with the name overridden by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    pub name: String,
    pub id: u64,
}

/// Metadata stamped onto every emitted event. Built once when the
/// beacon node reports ready and treated as an immutable snapshot for
/// the rest of the process lifetime; only the clock drift is sampled
/// live at decoration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub implementation: String,
    pub os: String,
    pub clock_drift_ms: i64,
    pub network: NetworkIdentity,
    pub consensus_implementation: String,
    pub consensus_version: String,
    pub labels: BTreeMap<String, String>,
}

impl ClientMeta {
    /// Returns a copy of the snapshot carrying the given live drift
    /// sample instead of the drift measured at readiness.
    pub fn with_drift(&self, clock_drift_ms: i64) -> Self {
        let mut meta = self.clone();
        meta.clock_drift_ms = clock_drift_ms;
        meta
    }
}

/// Measured offset between the local clock and the reference time
/// server, in milliseconds. Updated by the drift probe task and
/// read-snapshotted per decorated event.
#[derive(Debug, Default)]
pub struct ClockDrift {
    millis: AtomicI64,
}

impl ClockDrift {
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }

    pub fn millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}
