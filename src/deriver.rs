//! Event derivation: the shared driver loop that walks a checkpoint
//! iterator and the six per-kind extractors that turn blocks into
//! sub-event lists.

pub mod driver;
pub mod extract;

pub use driver::{
    BlockDeriver, BlockDeriverParams, DeriverFuture, EventDeriver, EventsCallback,
    LocationCallback,
};
pub use extract::{
    AttesterSlashingExtractor, BlsToExecutionChangeExtractor, DepositExtractor, ExecutionTransactionExtractor,
    ExtractError, ExtractedEvent, Extractor, ProposerSlashingExtractor, VoluntaryExitExtractor,
};
