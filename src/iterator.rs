//! Resumable chain walk bounded by the finalized checkpoint, with the
//! coordinator as the durable cursor store.

pub mod checkpoint;

pub use checkpoint::{
    CheckpointIterator, CheckpointIteratorParams, CommitOutcome, Lease, Next,
};
