use crate::coordinator::client::{CoordinatorClient, CoordinatorError, UpsertOutcome};
use crate::event::kind::EventKind;
use crate::event::position::Position;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process coordinator with real compare-and-swap semantics. Used by
/// tests and by embedders that run a single instance without a remote
/// coordinator.
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    entries: Mutex<HashMap<(String, EventKind), Position>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a cursor, bypassing the CAS guard.
    pub fn seed(&self, network_id: &str, kind: EventKind, position: Position) {
        self.entries
            .lock()
            .expect("coordinator store poisoned")
            .insert((network_id.to_owned(), kind), position);
    }
}

#[async_trait]
impl CoordinatorClient for MemoryCoordinator {
    async fn get_location(
        &self,
        network_id: &str,
        kind: EventKind,
    ) -> Result<Option<Position>, CoordinatorError> {
        let entries = self.entries.lock().expect("coordinator store poisoned");
        Ok(entries.get(&(network_id.to_owned(), kind)).copied())
    }

    async fn upsert_location(
        &self,
        network_id: &str,
        kind: EventKind,
        next: Position,
        prev: Option<Position>,
    ) -> Result<UpsertOutcome, CoordinatorError> {
        let mut entries = self.entries.lock().expect("coordinator store poisoned");
        let key = (network_id.to_owned(), kind);
        let current = entries.get(&key).copied();

        if current != prev {
            return Ok(UpsertOutcome::Conflict { current });
        }

        entries.insert(key, next);
        Ok(UpsertOutcome::Applied)
    }
}
