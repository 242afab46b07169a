//! Sink contract. Concrete sinks (HTTP, gRPC, file, stdout) live with
//! the embedding binary; the core only fans decorated events out to
//! whatever implements this trait.

use crate::event::envelope::DecoratedEvent;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Governs whether a deriver's cursor may advance when sinks fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Cursor advances regardless of sink outcomes; durability of
    /// emission is the sink's concern.
    #[default]
    BestEffort,
    /// Cursor only advances when at least one sink accepted the batch.
    AtLeastOneSink,
}

/// External collaborator accepting batches of decorated events.
/// Delivery semantics beyond the `handle` result are the sink's
/// responsibility; the core may hand the same batch to a sink more
/// than once.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &str;

    async fn start(&self, ctx: CancellationToken) -> Result<()>;

    /// Flushes buffered events and releases resources. Called once
    /// during shutdown, bounded by the configured drain deadline.
    async fn stop(&self) -> Result<()>;

    /// Accepts a batch. Events within the batch arrive in position
    /// order for a single event kind.
    async fn handle(&self, events: &[DecoratedEvent]) -> Result<()>;
}
