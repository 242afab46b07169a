use crate::event::kind::EventKind;
use crate::event::position::Position;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failure surfaced by a coordinator call. All coordinator failures are
/// transient from the caller's perspective: back off and retry.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator request failed: {0}")]
    Transient(String),
}

/// Outcome of a guarded cursor advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The stored cursor matched the guard and was advanced.
    Applied,
    /// Another instance advanced first; `current` is what the
    /// coordinator holds now.
    Conflict { current: Option<Position> },
}

/// Durable cursor store shared by all harvester instances of a network.
///
/// `advance` is a compare-and-swap: the update only applies when the
/// stored value still equals `prev` (`None` meaning "no cursor stored
/// yet"). Whichever instance advances first wins; the loser observes
/// [`UpsertOutcome::Conflict`], refreshes, and moves on.
#[async_trait]
pub trait CoordinatorClient: Send + Sync + 'static {
    /// Returns the stored next-unprocessed position, or `None` when no
    /// cursor exists yet for this `(network, kind)` pair.
    async fn get_location(
        &self,
        network_id: &str,
        kind: EventKind,
    ) -> Result<Option<Position>, CoordinatorError>;

    /// Advances the cursor to `next`, guarded by the previously
    /// observed value.
    async fn upsert_location(
        &self,
        network_id: &str,
        kind: EventKind,
        next: Position,
        prev: Option<Position>,
    ) -> Result<UpsertOutcome, CoordinatorError>;

    /// Optional liveness signal; not required for correctness.
    async fn heartbeat(&self, _instance: Uuid) -> Result<(), CoordinatorError> {
        Ok(())
    }
}

/// A stored cursor value. The payload is scoped by the event kind it
/// was written under; readers of a different kind must not interpret
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub kind: EventKind,
    pub position: Position,
}

/// Wire request for reading a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLocationRequest {
    pub network_id: String,
    pub kind: EventKind,
}

/// Wire response for reading a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLocationResponse {
    pub location: Option<StoredLocation>,
    pub found: bool,
}

/// Wire request for the guarded advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertLocationRequest {
    pub network_id: String,
    pub kind: EventKind,
    pub location: StoredLocation,
    pub prev_location: Option<StoredLocation>,
}

/// Wire response for the guarded advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertLocationResponse {
    pub ok: bool,
    pub current_location: Option<StoredLocation>,
}
