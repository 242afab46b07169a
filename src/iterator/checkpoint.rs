use crate::beacon::node::BeaconFacade;
use crate::beacon::wallclock::Wallclock;
use crate::coordinator::client::{CoordinatorClient, CoordinatorError, UpsertOutcome};
use crate::event::kind::EventKind;
use crate::event::position::Position;
use crate::runtime::backoff::{jittered, Backoff, BackoffPolicy};
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of asking the iterator for work.
#[derive(Debug)]
pub enum Next {
    /// A processable position and the lease required to commit it.
    Ready(Position, Lease),
    /// Nothing to do yet; check again after the hinted delay.
    Wait(Duration),
    /// The configured stop position has been passed.
    Exhausted,
}

/// Token bundling the cursor and finalization observed by `next`.
/// `commit` needs it so staleness is detectable by the coordinator.
#[derive(Debug, Clone)]
pub struct Lease {
    position: Position,
    observed_finalized: Position,
    prev: Option<Position>,
}

impl Lease {
    pub fn position(&self) -> Position {
        self.position
    }

    /// The raw finalized checkpoint reported by the beacon when the
    /// lease was taken.
    pub fn observed_finalized(&self) -> Position {
        self.observed_finalized
    }
}

/// Outcome of committing a lease.
#[derive(Debug)]
pub enum CommitOutcome {
    Committed,
    /// Another instance advanced the cursor first. In-flight work for
    /// the leased position must be discarded; the next `next` call
    /// re-reads the stored cursor. `retry_after` carries the bumped
    /// backoff delay.
    Conflict {
        current: Option<Position>,
        retry_after: Duration,
    },
}

pub struct CheckpointIteratorParams {
    pub network_name: String,
    pub network_id: String,
    pub kind: EventKind,
    pub coordinator: Arc<dyn CoordinatorClient>,
    pub wallclock: Wallclock,
    pub beacon: Arc<dyn BeaconFacade>,
    pub checkpoint_name: String,
    pub head_lag_epochs: u64,
    pub override_start_epoch: Option<u64>,
    pub wait_ceiling: Duration,
    pub telemetry: Arc<Telemetry>,
}

/// Walks the chain for one `(network, event kind)` pair. The cursor
/// lives with the coordinator; this type only holds the backoff state
/// and the single outstanding lease, so several instances can race
/// safely on the same cursor.
pub struct CheckpointIterator {
    network_name: String,
    network_id: String,
    kind: EventKind,
    coordinator: Arc<dyn CoordinatorClient>,
    wallclock: Wallclock,
    beacon: Arc<dyn BeaconFacade>,
    checkpoint_name: String,
    head_lag_epochs: u64,
    override_start_epoch: Option<u64>,
    wait_ceiling: Duration,
    telemetry: Arc<Telemetry>,
    backoff: Backoff,
    stop_at: Option<Position>,
    leased: bool,
}

impl CheckpointIterator {
    pub fn new(params: CheckpointIteratorParams) -> Self {
        let CheckpointIteratorParams {
            network_name,
            network_id,
            kind,
            coordinator,
            wallclock,
            beacon,
            checkpoint_name,
            head_lag_epochs,
            override_start_epoch,
            wait_ceiling,
            telemetry,
        } = params;

        Self {
            network_name,
            network_id,
            kind,
            coordinator,
            wallclock,
            beacon,
            checkpoint_name,
            head_lag_epochs,
            override_start_epoch,
            wait_ceiling,
            telemetry,
            backoff: Backoff::new(BackoffPolicy::default()),
            stop_at: None,
            leased: false,
        }
    }

    /// Stops the walk once the cursor passes the given position.
    /// Without it the iterator follows the chain forever.
    pub fn with_stop_at(mut self, stop_at: Position) -> Self {
        self.stop_at = Some(stop_at);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn checkpoint_name(&self) -> &str {
        &self.checkpoint_name
    }

    /// Returns the next processable position, a wait hint, or
    /// exhaustion. Transient coordinator and beacon failures surface as
    /// wait hints with exponential backoff; the backoff resets on the
    /// next successful commit.
    pub async fn next(&mut self) -> Next {
        if self.leased {
            tracing::debug!(
                network = %self.network_name,
                kind = %self.kind,
                "next called with an outstanding lease; discarding it"
            );
            self.leased = false;
        }

        let stored = match self
            .coordinator
            .get_location(&self.network_id, self.kind)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                self.telemetry.record_coordinator_error();
                let delay = self.backoff.bump();
                tracing::warn!(
                    network = %self.network_name,
                    kind = %self.kind,
                    error = %err,
                    backoff_ms = delay.as_millis() as u64,
                    "failed to read cursor; backing off"
                );
                return Next::Wait(delay);
            }
        };

        let Some(finalized) = self.beacon.finalized_checkpoint() else {
            self.telemetry.record_beacon_error();
            let delay = self.backoff.bump();
            tracing::warn!(
                network = %self.network_name,
                kind = %self.kind,
                checkpoint = %self.checkpoint_name,
                backoff_ms = delay.as_millis() as u64,
                "beacon has no finalized checkpoint yet; backing off"
            );
            return Next::Wait(delay);
        };

        let cursor = stored.unwrap_or_else(|| self.seed());

        if let Some(stop_at) = self.stop_at {
            if cursor > stop_at {
                return Next::Exhausted;
            }
        }

        let effective = finalized.lag_epochs(self.head_lag_epochs, self.wallclock.slots_per_epoch());
        if cursor > effective {
            return Next::Wait(self.wait_hint());
        }

        self.leased = true;
        Next::Ready(
            cursor,
            Lease {
                position: cursor,
                observed_finalized: finalized,
                prev: stored,
            },
        )
    }

    /// Advances the stored cursor to `next_position`, guarded by the
    /// leased value. A conflict means another instance won the race;
    /// the caller discards in-flight work for the leased position.
    pub async fn commit(
        &mut self,
        lease: &Lease,
        next_position: Position,
    ) -> Result<CommitOutcome, CoordinatorError> {
        let outcome = self
            .coordinator
            .upsert_location(&self.network_id, self.kind, next_position, lease.prev)
            .await;

        match outcome {
            Ok(UpsertOutcome::Applied) => {
                self.leased = false;
                self.backoff.reset();
                Ok(CommitOutcome::Committed)
            }
            Ok(UpsertOutcome::Conflict { current }) => {
                self.leased = false;
                self.telemetry.record_cas_conflict();
                let retry_after = self.backoff.bump();
                tracing::info!(
                    network = %self.network_name,
                    kind = %self.kind,
                    leased = %lease.position,
                    current = ?current,
                    "cursor advanced by another instance; discarding in-flight work"
                );
                Ok(CommitOutcome::Conflict {
                    current,
                    retry_after,
                })
            }
            Err(err) => {
                self.telemetry.record_coordinator_error();
                Err(err)
            }
        }
    }

    /// Positions after `lease.position()` that are already processable,
    /// up to `distance`. Used to warm block fetches ahead of the walk.
    pub fn lookahead(&self, lease: &Lease, distance: u64) -> Vec<Position> {
        let slots_per_epoch = self.wallclock.slots_per_epoch();
        let effective = lease
            .observed_finalized
            .lag_epochs(self.head_lag_epochs, slots_per_epoch);

        let mut upcoming = Vec::new();
        let mut position = lease.position;
        for _ in 0..distance {
            position = position.next(slots_per_epoch);
            if position > effective {
                break;
            }
            upcoming.push(position);
        }
        upcoming
    }

    fn seed(&self) -> Position {
        let slots_per_epoch = self.wallclock.slots_per_epoch();
        let epoch = self.override_start_epoch.unwrap_or(0);
        Position::from_slot(epoch.saturating_mul(slots_per_epoch), slots_per_epoch)
    }

    /// Estimate until the next finalization advance, capped and
    /// jittered so racing instances spread their polling.
    fn wait_hint(&self) -> Duration {
        jittered(self.wallclock.epoch_duration().min(self.wait_ceiling))
    }
}
