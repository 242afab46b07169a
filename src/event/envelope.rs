use crate::event::kind::EventKind;
use crate::event::meta::ClientMeta;
use crate::event::position::Position;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Per-event metadata: the client snapshot (with the drift sampled at
/// decoration time) and the instant the event was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub client: ClientMeta,
    pub event_date_time: SystemTime,
}

/// Correlation data tying a derived event back to its enclosing block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub block_root: String,
    pub slot: u64,
    pub epoch: u64,
    pub position_in_block: u64,
    pub finalized_when_observed: bool,
}

/// The envelope handed to sinks. The `data` payload is kind-specific
/// and opaque to the harvester core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratedEvent {
    pub event_type: EventKind,
    pub position: Position,
    pub meta: EventMeta,
    pub data: serde_json::Value,
    pub additional_data: BlockContext,
}
