//! The shared extraction loop. All six derivers are this driver
//! parameterised by an [`Extractor`]; the loop, commit discipline, and
//! backoff live here exactly once.

use crate::beacon::block::BeaconBlock;
use crate::beacon::node::BeaconFacade;
use crate::beacon::wallclock::Wallclock;
use crate::deriver::extract::{ExtractedEvent, Extractor};
use crate::event::envelope::{BlockContext, DecoratedEvent, EventMeta};
use crate::event::kind::EventKind;
use crate::event::meta::{ClientMeta, ClockDrift};
use crate::event::position::Position;
use crate::iterator::checkpoint::{CheckpointIterator, CommitOutcome, Lease, Next};
use crate::runtime::backoff::{sleep_with_cancellation, Backoff, BackoffPolicy};
use crate::runtime::config::DeriverSettings;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type DeriverFuture = BoxFuture<'static, Result<()>>;

/// Sink-facing callback. The driver awaits it before committing, so a
/// slow or stuck fan-out stops the walk instead of losing events.
pub type EventsCallback = Box<dyn Fn(Vec<DecoratedEvent>) -> DeriverFuture + Send + Sync>;

/// Progress callback, invoked after each successful commit with the
/// processed position's numeric form.
pub type LocationCallback = Box<dyn Fn(u64) -> DeriverFuture + Send + Sync>;

/// Capability set every deriver exposes to the orchestrator.
#[async_trait]
pub trait EventDeriver: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> EventKind;

    /// Registers a sink-facing callback. Must be called before `start`.
    fn on_events_derived(&mut self, callback: EventsCallback);

    /// Registers a progress callback. Must be called before `start`.
    fn on_location_updated(&mut self, callback: LocationCallback);

    /// Begins the extraction loop on its own task. Called once.
    fn start(&mut self, ctx: CancellationToken) -> Result<()>;

    /// Waits for the extraction loop to finish after cancellation.
    async fn stop(&mut self) -> Result<()>;
}

pub struct BlockDeriverParams<E: Extractor> {
    pub extractor: E,
    pub iterator: CheckpointIterator,
    pub beacon: Arc<dyn BeaconFacade>,
    pub client_meta: Arc<ClientMeta>,
    pub clock_drift: Arc<ClockDrift>,
    pub telemetry: Arc<Telemetry>,
    pub settings: DeriverSettings,
    pub network_name: String,
}

/// A deriver for one event kind: walks its checkpoint iterator, fetches
/// blocks, extracts and decorates sub-events, and advances the cursor
/// only after the fan-out accepted the batch.
pub struct BlockDeriver<E: Extractor> {
    name: &'static str,
    kind: EventKind,
    loop_state: Option<DriverLoop<E>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl<E: Extractor> BlockDeriver<E> {
    pub fn new(params: BlockDeriverParams<E>) -> Self {
        let BlockDeriverParams {
            extractor,
            iterator,
            beacon,
            client_meta,
            clock_drift,
            telemetry,
            settings,
            network_name,
        } = params;

        let name = extractor.name();
        let kind = extractor.kind();
        let wallclock = beacon.wallclock();

        Self {
            name,
            kind,
            loop_state: Some(DriverLoop {
                extractor,
                iterator,
                beacon,
                wallclock,
                client_meta,
                clock_drift,
                telemetry,
                settings,
                network_name,
                name,
                kind,
                events_callbacks: Vec::new(),
                location_callbacks: Vec::new(),
            }),
            handle: None,
        }
    }
}

#[async_trait]
impl<E: Extractor> EventDeriver for BlockDeriver<E> {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> EventKind {
        self.kind
    }

    fn on_events_derived(&mut self, callback: EventsCallback) {
        match self.loop_state.as_mut() {
            Some(state) => state.events_callbacks.push(callback),
            None => tracing::warn!(
                deriver = self.name,
                "events callback registered after start; ignoring"
            ),
        }
    }

    fn on_location_updated(&mut self, callback: LocationCallback) {
        match self.loop_state.as_mut() {
            Some(state) => state.location_callbacks.push(callback),
            None => tracing::warn!(
                deriver = self.name,
                "location callback registered after start; ignoring"
            ),
        }
    }

    fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let state = self
            .loop_state
            .take()
            .context("deriver already started")?;
        self.handle = Some(tokio::spawn(state.run(ctx)));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("deriver task terminated unexpectedly: {err}")),
        }
    }
}

struct DriverLoop<E: Extractor> {
    extractor: E,
    iterator: CheckpointIterator,
    beacon: Arc<dyn BeaconFacade>,
    wallclock: Wallclock,
    client_meta: Arc<ClientMeta>,
    clock_drift: Arc<ClockDrift>,
    telemetry: Arc<Telemetry>,
    settings: DeriverSettings,
    network_name: String,
    name: &'static str,
    kind: EventKind,
    events_callbacks: Vec<EventsCallback>,
    location_callbacks: Vec<LocationCallback>,
}

impl<E: Extractor> DriverLoop<E> {
    async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        tracing::info!(
            deriver = self.name,
            kind = %self.kind,
            network = %self.network_name,
            "event deriver started"
        );

        let mut retry = Backoff::new(BackoffPolicy::default());

        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => break,
                next = self.iterator.next() => next,
            };

            let keep_going = match next {
                Next::Wait(delay) => pause(&ctx, delay).await,
                Next::Exhausted => {
                    tracing::info!(deriver = self.name, "iterator exhausted");
                    break;
                }
                Next::Ready(position, lease) => {
                    self.process(position, &lease, &ctx, &mut retry).await
                }
            };

            if !keep_going {
                break;
            }
        }

        tracing::info!(deriver = self.name, kind = %self.kind, "event deriver stopped");
        Ok(())
    }

    /// Handles one leased position. Returns `false` once cancellation
    /// has been observed.
    async fn process(
        &mut self,
        position: Position,
        lease: &Lease,
        ctx: &CancellationToken,
        retry: &mut Backoff,
    ) -> bool {
        let slots_per_epoch = self.wallclock.slots_per_epoch();
        let fetched = tokio::select! {
            _ = ctx.cancelled() => return false,
            fetched = self.beacon.fetch_block(position) => fetched,
        };

        let block = match fetched {
            Err(err) => {
                self.telemetry.record_beacon_error();
                tracing::warn!(
                    deriver = self.name,
                    position = %position,
                    error = %err,
                    "block fetch failed; backing off"
                );
                return pause(ctx, retry.bump()).await;
            }
            Ok(None) => {
                self.telemetry.record_missing_slot();
                tracing::debug!(
                    deriver = self.name,
                    position = %position,
                    "block unavailable; committing past it"
                );
                return self
                    .commit_and_report(lease, position.next(slots_per_epoch), position, 0, ctx, retry)
                    .await;
            }
            Ok(Some(block)) => block,
        };

        let extracted = match self.extractor.extract(&block) {
            Ok(extracted) => extracted,
            Err(err) => {
                self.telemetry.record_decode_error();
                tracing::warn!(
                    deriver = self.name,
                    position = %position,
                    error = %err,
                    "failed to extract events; committing past the block"
                );
                return self
                    .commit_and_report(lease, position.next(slots_per_epoch), position, 0, ctx, retry)
                    .await;
            }
        };

        let derived = extracted.len() as u64;
        if !extracted.is_empty() {
            let batch = self.decorate(&block, position, lease, extracted);
            if let Err(err) = self.deliver(batch).await {
                tracing::warn!(
                    deriver = self.name,
                    position = %position,
                    error = %err,
                    "fan-out rejected the batch; retrying position"
                );
                return pause(ctx, retry.bump()).await;
            }
        }

        self.commit_and_report(lease, position.next(slots_per_epoch), position, derived, ctx, retry)
            .await
    }

    async fn commit_and_report(
        &mut self,
        lease: &Lease,
        next_position: Position,
        position: Position,
        derived: u64,
        ctx: &CancellationToken,
        retry: &mut Backoff,
    ) -> bool {
        loop {
            match self.iterator.commit(lease, next_position).await {
                Ok(CommitOutcome::Committed) => {
                    retry.reset();
                    self.telemetry.record_derived_events(derived);

                    for callback in &self.location_callbacks {
                        if let Err(err) = callback(position.numeric()).await {
                            tracing::warn!(
                                deriver = self.name,
                                error = %err,
                                "location callback failed"
                            );
                        }
                    }

                    self.spawn_prefetch(lease, ctx);
                    return true;
                }
                Ok(CommitOutcome::Conflict { retry_after, .. }) => {
                    // In-flight work for the position is already
                    // discarded; the next lease re-reads the cursor.
                    return pause(ctx, retry_after).await;
                }
                Err(err) => {
                    tracing::warn!(
                        deriver = self.name,
                        position = %position,
                        error = %err,
                        "commit failed; backing off and retrying"
                    );
                    if !pause(ctx, retry.bump()).await {
                        return false;
                    }
                }
            }
        }
    }

    fn decorate(
        &self,
        block: &BeaconBlock,
        position: Position,
        lease: &Lease,
        extracted: Vec<ExtractedEvent>,
    ) -> Vec<DecoratedEvent> {
        let event_date_time = SystemTime::now();
        let client = self.client_meta.with_drift(self.clock_drift.millis());
        let finalized_when_observed = position <= lease.observed_finalized();
        let epoch = self.wallclock.epoch_of_slot(block.slot);

        extracted
            .into_iter()
            .map(|event| DecoratedEvent {
                event_type: self.kind,
                position,
                meta: EventMeta {
                    client: client.clone(),
                    event_date_time,
                },
                data: event.data,
                additional_data: BlockContext {
                    block_root: block.root.clone(),
                    slot: block.slot,
                    epoch,
                    position_in_block: event.index,
                    finalized_when_observed,
                },
            })
            .collect()
    }

    async fn deliver(&self, batch: Vec<DecoratedEvent>) -> Result<()> {
        for callback in &self.events_callbacks {
            callback(batch.clone()).await?;
        }
        Ok(())
    }

    /// Warms the façade's block cache for upcoming positions. Results
    /// are discarded; the walk itself re-fetches authoritatively.
    fn spawn_prefetch(&self, lease: &Lease, ctx: &CancellationToken) {
        if self.settings.lookahead_distance == 0 {
            return;
        }

        let upcoming = self.iterator.lookahead(lease, self.settings.lookahead_distance);
        if upcoming.is_empty() {
            return;
        }

        let beacon = self.beacon.clone();
        let token = ctx.child_token();
        tokio::spawn(async move {
            for position in upcoming {
                tokio::select! {
                    _ = token.cancelled() => break,
                    fetched = beacon.fetch_block(position) => {
                        if fetched.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

async fn pause(ctx: &CancellationToken, delay: Duration) -> bool {
    sleep_with_cancellation(delay, Some(ctx)).await.is_ok()
}
