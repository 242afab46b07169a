pub mod beacon;
pub mod coordinator;
pub mod deriver;
pub mod event;
pub mod harvester;
pub mod iterator;
pub mod runtime;
pub mod sink;

pub use beacon::block::BeaconBlock;
pub use beacon::node::{BeaconError, BeaconFacade, NodeMetadata};
pub use beacon::wallclock::{TimeWindow, Wallclock};
pub use coordinator::{CoordinatorClient, CoordinatorError, MemoryCoordinator, UpsertOutcome};
pub use deriver::{BlockDeriver, BlockDeriverParams, EventDeriver, ExtractedEvent, Extractor};
pub use event::envelope::{BlockContext, DecoratedEvent, EventMeta};
pub use event::kind::EventKind;
pub use event::meta::{ClientMeta, ClockDrift, NetworkIdentity};
pub use event::position::Position;
pub use harvester::{DriftSampler, Harvester, HarvesterState};
pub use iterator::{CheckpointIterator, CheckpointIteratorParams, CommitOutcome, Lease, Next};
pub use runtime::config::{
    DeriverSettings, HarvesterConfig, HarvesterConfigBuilder, HarvesterConfigParams,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use sink::{DeliveryPolicy, Sink};
