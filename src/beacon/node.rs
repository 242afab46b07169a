//! The façade trait the iterator and derivers consume. Real transports
//! (an HTTP beacon API client) implement this trait outside the core;
//! tests drive the pipeline through scripted implementations.

use crate::beacon::block::BeaconBlock;
use crate::beacon::wallclock::Wallclock;
use crate::event::meta::NetworkIdentity;
use crate::event::position::Position;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Snapshot of the attached node's identity, captured after readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub network: NetworkIdentity,
    pub client: String,
    pub version: String,
}

/// Failure surfaced by the façade. Every variant is transient for the
/// requested position: callers back off and retry. A block the node
/// genuinely cannot serve is reported as `Ok(None)` from
/// [`BeaconFacade::fetch_block`] instead.
#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("beacon request failed: {0}")]
    Transient(String),
    #[error("beacon node is not ready")]
    NotReady,
}

/// The exact view of the beacon node the core consumes.
#[async_trait]
pub trait BeaconFacade: Send + Sync + 'static {
    /// Node identity. Only meaningful once the readiness signal fired.
    fn metadata(&self) -> NodeMetadata;

    /// The genesis-anchored clock of the attached network.
    fn wallclock(&self) -> Wallclock;

    /// Latest known finalized checkpoint, or `None` until the node has
    /// reported one. The value may regress transiently; consumers must
    /// never walk past whatever is currently reported.
    fn finalized_checkpoint(&self) -> Option<Position>;

    /// Fetches the block at the given position. `Ok(None)` means the
    /// node cannot serve this position (empty slot or pruned history)
    /// and the caller should move on.
    async fn fetch_block(&self, position: Position) -> Result<Option<Arc<BeaconBlock>>, BeaconError>;

    /// Readiness subscription. The channel latches `true` exactly once
    /// per process lifetime, when the node has both a finalized
    /// checkpoint and a non-empty network identity.
    fn subscribe_ready(&self) -> watch::Receiver<bool>;
}
