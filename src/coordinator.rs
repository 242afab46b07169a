//! Coordinator client contract: durable per-(network, event kind)
//! cursors advanced with compare-and-swap semantics so redundant
//! harvester instances can race safely.

pub mod client;
pub mod memory;

pub use client::{
    CoordinatorClient, CoordinatorError, GetLocationRequest, GetLocationResponse, StoredLocation,
    UpsertLocationRequest, UpsertLocationResponse, UpsertOutcome,
};
pub use memory::MemoryCoordinator;
