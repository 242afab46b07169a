//! Orchestration: wires the beacon façade, coordinator client, and
//! sinks together, builds the six event derivers once the beacon
//! reports ready, and owns the clock-drift probe and shutdown cascade.

use crate::beacon::node::BeaconFacade;
use crate::coordinator::client::CoordinatorClient;
use crate::deriver::driver::{BlockDeriver, BlockDeriverParams, EventDeriver};
use crate::deriver::extract::{
    AttesterSlashingExtractor, BlsToExecutionChangeExtractor, DepositExtractor,
    ExecutionTransactionExtractor, Extractor, ProposerSlashingExtractor, VoluntaryExitExtractor,
};
use crate::event::envelope::DecoratedEvent;
use crate::event::meta::{ClientMeta, ClockDrift, NetworkIdentity};
use crate::iterator::checkpoint::{CheckpointIterator, CheckpointIteratorParams};
use crate::runtime::config::HarvesterConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sink::{DeliveryPolicy, Sink};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Samples the offset between the local clock and a reference time
/// server, in signed milliseconds. The NTP transport lives with the
/// embedding binary; the core only polls whatever implements this.
#[async_trait]
pub trait DriftSampler: Send + Sync + 'static {
    async fn sample(&self) -> Result<i64>;
}

/// Observable lifecycle state. Derivers do not exist before the beacon
/// reports ready; callers must not assume them earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvesterState {
    Stopped,
    AwaitingBeacon,
    Ready,
}

struct Shared {
    config: HarvesterConfig,
    sinks: Vec<Arc<dyn Sink>>,
    beacon: Arc<dyn BeaconFacade>,
    coordinator: Arc<dyn CoordinatorClient>,
    clock_drift: Arc<ClockDrift>,
    id: Uuid,
    telemetry: Arc<Telemetry>,
    derivers: tokio::sync::Mutex<Vec<Box<dyn EventDeriver>>>,
    ready: AtomicBool,
}

impl Shared {
    /// Fans a batch out to every sink serially. Individual sink
    /// failures are logged and counted; whether they block the cursor
    /// depends on the configured delivery policy.
    async fn handle_derived_events(&self, events: Vec<DecoratedEvent>) -> Result<()> {
        let mut accepted = 0usize;

        for sink in &self.sinks {
            if let Err(err) = sink.handle(&events).await {
                self.telemetry.record_sink_error();
                tracing::error!(
                    sink = sink.name(),
                    events = events.len(),
                    error = %err,
                    "failed to send events to sink"
                );
            } else {
                accepted += 1;
            }
        }

        match self.config.delivery_policy() {
            DeliveryPolicy::BestEffort => Ok(()),
            DeliveryPolicy::AtLeastOneSink => {
                if accepted > 0 || self.sinks.is_empty() {
                    Ok(())
                } else {
                    bail!("no sink accepted a batch of {} events", events.len())
                }
            }
        }
    }
}

struct RunHandles {
    run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    metrics_handle: JoinHandle<()>,
    drift_handle: Option<JoinHandle<()>>,
    readiness_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
}

/// The harvester: walks the finalized chain through six event derivers
/// and forwards decorated events to the configured sinks.
pub struct Harvester {
    shared: Arc<Shared>,
    drift_sampler: Option<Arc<dyn DriftSampler>>,
    shutdown_root: CancellationToken,
    run: Option<RunHandles>,
    running: bool,
}

impl Harvester {
    /// Creates a harvester with its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to integrate with an existing
    /// shutdown mechanism.
    pub fn new(
        config: HarvesterConfig,
        beacon: Arc<dyn BeaconFacade>,
        coordinator: Arc<dyn CoordinatorClient>,
        sinks: Vec<Arc<dyn Sink>>,
        drift_sampler: Option<Arc<dyn DriftSampler>>,
    ) -> Self {
        Self::with_cancellation_token(
            config,
            beacon,
            coordinator,
            sinks,
            drift_sampler,
            CancellationToken::new(),
        )
    }

    pub fn with_cancellation_token(
        config: HarvesterConfig,
        beacon: Arc<dyn BeaconFacade>,
        coordinator: Arc<dyn CoordinatorClient>,
        sinks: Vec<Arc<dyn Sink>>,
        drift_sampler: Option<Arc<dyn DriftSampler>>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                sinks,
                beacon,
                coordinator,
                clock_drift: Arc::new(ClockDrift::default()),
                id: Uuid::new_v4(),
                telemetry: Arc::new(Telemetry::default()),
                derivers: tokio::sync::Mutex::new(Vec::new()),
                ready: AtomicBool::new(false),
            }),
            drift_sampler,
            shutdown_root: shutdown_token,
            run: None,
            running: false,
        }
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.shared.config
    }

    /// Process-lifetime instance id stamped into client metadata.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.shared.telemetry.clone()
    }

    pub fn state(&self) -> HarvesterState {
        if !self.running {
            HarvesterState::Stopped
        } else if self.shared.ready.load(Ordering::SeqCst) {
            HarvesterState::Ready
        } else {
            HarvesterState::AwaitingBeacon
        }
    }

    /// Replaces the root shutdown token. Must only be called while the
    /// harvester is idle (between `stop` and `start`).
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.running,
            "shutdown token should not change while the harvester is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts sinks and background tasks, then waits (asynchronously)
    /// for beacon readiness before firing up the event derivers.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("harvester already running");
        }

        debug_assert!(
            self.shared.config.validate().is_ok(),
            "HarvesterConfig should have been validated at construction time"
        );

        let run_token = self.shutdown_root.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            self.shutdown_root.clone(),
            run_token.clone(),
        ));

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            id = %self.shared.id,
            name = self.shared.config.name(),
            "starting beacon telemetry harvester"
        );

        if let Some(network) = self.shared.config.override_network_name() {
            tracing::info!(network, "overriding network name");
        }

        let metrics_handle = telemetry::spawn_metrics_reporter(
            self.shared.telemetry.clone(),
            run_token.clone(),
            self.shared.config.metrics_interval(),
        );

        for sink in &self.shared.sinks {
            sink.start(run_token.clone())
                .await
                .with_context(|| format!("failed to start sink {}", sink.name()))?;
        }

        let drift_handle = self.drift_sampler.as_ref().map(|sampler| {
            spawn_drift_probe(
                sampler.clone(),
                self.shared.clock_drift.clone(),
                self.shared.config.drift_interval(),
                run_token.clone(),
            )
        });

        let heartbeat_handle = spawn_heartbeat(
            self.shared.coordinator.clone(),
            self.shared.id,
            run_token.clone(),
        );

        let readiness_handle = spawn_readiness_watch(
            self.shared.clone(),
            run_token.clone(),
            fatal_handler.clone(),
        );

        self.run = Some(RunHandles {
            run_token,
            fatal_handler,
            metrics_handle,
            drift_handle,
            readiness_handle,
            heartbeat_handle,
        });
        self.running = true;

        Ok(())
    }

    /// Cancels the run, joins the derivers, and drains sinks under the
    /// configured deadline. Returns the first fatal pipeline error, if
    /// any was captured during the run.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("stopping beacon telemetry harvester");

        let Some(run) = self.run.take() else {
            self.running = false;
            return Ok(());
        };

        run.run_token.cancel();

        {
            let mut derivers = self.shared.derivers.lock().await;
            for deriver in derivers.iter_mut() {
                if let Err(err) = deriver.stop().await {
                    tracing::warn!(
                        deriver = deriver.name(),
                        error = %err,
                        "deriver stopped with error"
                    );
                }
            }
            derivers.clear();
        }

        for (label, handle) in [
            ("readiness watcher", Some(run.readiness_handle)),
            ("heartbeat", Some(run.heartbeat_handle)),
            ("drift probe", run.drift_handle),
            ("metrics reporter", Some(run.metrics_handle)),
        ] {
            let Some(handle) = handle else { continue };
            if let Err(err) = handle.await {
                tracing::warn!(task = label, error = %err, "background task panicked");
            }
        }

        tracing::info!("flushing sinks");
        let drain_deadline = self.shared.config.sink_drain_deadline();
        for sink in &self.shared.sinks {
            match timeout(drain_deadline, sink.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(sink = sink.name(), error = %err, "sink stop failed");
                }
                Err(_) => {
                    tracing::warn!(
                        sink = sink.name(),
                        deadline_ms = drain_deadline.as_millis() as u64,
                        "sink did not drain within the deadline"
                    );
                }
            }
        }

        self.shared.ready.store(false, Ordering::SeqCst);
        self.running = false;

        if let Some(err) = run.fatal_handler.error() {
            return Err(err).context("harvest pipeline aborted");
        }

        Ok(())
    }
}

fn spawn_readiness_watch(
    shared: Arc<Shared>,
    run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready_rx = shared.beacon.subscribe_ready();

        while !*ready_rx.borrow() {
            tokio::select! {
                _ = run_token.cancelled() => return,
                changed = ready_rx.changed() => {
                    if changed.is_err() {
                        tracing::warn!("beacon readiness channel closed before readiness");
                        return;
                    }
                }
            }
        }

        if let Err(err) = on_beacon_ready(&shared, &run_token).await {
            fatal_handler.trigger("harvester readiness", err);
        }
    })
}

/// Builds the client metadata snapshot and the six derivers, wires the
/// sink fan-out and progress callbacks, and starts every enabled
/// deriver. Runs exactly once per harvester run.
async fn on_beacon_ready(shared: &Arc<Shared>, run_token: &CancellationToken) -> Result<()> {
    let metadata = shared.beacon.metadata();

    let mut network = metadata.network.clone();
    if let Some(name) = shared.config.override_network_name() {
        network.name = name.to_owned();
    }
    let network_id = network.id.to_string();

    tracing::info!(
        network = %network.name,
        consensus = %metadata.client,
        "beacon node is ready; firing up event derivers"
    );

    let client_meta = Arc::new(ClientMeta {
        id: shared.id,
        name: shared.config.name().to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        implementation: env!("CARGO_PKG_NAME").to_owned(),
        os: std::env::consts::OS.to_owned(),
        clock_drift_ms: shared.clock_drift.millis(),
        network: network.clone(),
        consensus_implementation: metadata.client,
        consensus_version: metadata.version,
        labels: shared.config.labels().clone(),
    });

    let mut derivers: Vec<Box<dyn EventDeriver>> = Vec::with_capacity(6);
    build_deriver(shared, &client_meta, &network, &network_id, AttesterSlashingExtractor, &mut derivers);
    build_deriver(shared, &client_meta, &network, &network_id, ProposerSlashingExtractor, &mut derivers);
    build_deriver(shared, &client_meta, &network, &network_id, VoluntaryExitExtractor, &mut derivers);
    build_deriver(shared, &client_meta, &network, &network_id, DepositExtractor, &mut derivers);
    build_deriver(shared, &client_meta, &network, &network_id, BlsToExecutionChangeExtractor, &mut derivers);
    build_deriver(shared, &client_meta, &network, &network_id, ExecutionTransactionExtractor, &mut derivers);

    for deriver in derivers.iter_mut() {
        let kind = deriver.kind();
        let settings = shared.config.deriver_settings(kind);
        if !settings.enabled {
            tracing::info!(deriver = deriver.name(), kind = %kind, "deriver disabled; skipping");
            continue;
        }

        let fan_out = shared.clone();
        deriver.on_events_derived(Box::new(move |events| {
            let fan_out = fan_out.clone();
            Box::pin(async move { fan_out.handle_derived_events(events).await })
        }));

        let telemetry = shared.telemetry.clone();
        deriver.on_location_updated(Box::new(move |location| {
            let telemetry = telemetry.clone();
            Box::pin(async move {
                telemetry.set_location(kind, location);
                Ok(())
            })
        }));

        tracing::info!(deriver = deriver.name(), kind = %kind, "starting event deriver");
        deriver.start(run_token.child_token())?;
    }

    let mut slot = shared.derivers.lock().await;
    *slot = derivers;
    shared.ready.store(true, Ordering::SeqCst);

    Ok(())
}

fn build_deriver<E: Extractor>(
    shared: &Arc<Shared>,
    client_meta: &Arc<ClientMeta>,
    network: &NetworkIdentity,
    network_id: &str,
    extractor: E,
    derivers: &mut Vec<Box<dyn EventDeriver>>,
) {
    let kind = extractor.kind();
    let settings = shared.config.deriver_settings(kind);

    let iterator = CheckpointIterator::new(CheckpointIteratorParams {
        network_name: network.name.clone(),
        network_id: network_id.to_owned(),
        kind,
        coordinator: shared.coordinator.clone(),
        wallclock: shared.beacon.wallclock(),
        beacon: shared.beacon.clone(),
        checkpoint_name: shared.config.checkpoint_name().to_owned(),
        head_lag_epochs: settings.head_lag_epochs,
        override_start_epoch: shared.config.override_start_epoch(),
        wait_ceiling: shared.config.wait_ceiling(),
        telemetry: shared.telemetry.clone(),
    });

    derivers.push(Box::new(BlockDeriver::new(BlockDeriverParams {
        extractor,
        iterator,
        beacon: shared.beacon.clone(),
        client_meta: client_meta.clone(),
        clock_drift: shared.clock_drift.clone(),
        telemetry: shared.telemetry.clone(),
        settings,
        network_name: network.name.clone(),
    })));
}

/// Polls the drift sampler on the configured cadence and publishes the
/// offset into the shared atomic read by event decoration.
fn spawn_drift_probe(
    sampler: Arc<dyn DriftSampler>,
    clock_drift: Arc<ClockDrift>,
    probe_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match sampler.sample().await {
                        Ok(millis) => {
                            clock_drift.set_millis(millis);
                            tracing::info!(drift_ms = millis, "updated clock drift");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to sync clock drift");
                        }
                    }
                }
            }
        }
    })
}

fn spawn_heartbeat(
    coordinator: Arc<dyn CoordinatorClient>,
    id: Uuid,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = coordinator.heartbeat(id).await {
                        tracing::debug!(error = %err, "coordinator heartbeat failed");
                    }
                }
            }
        }
    })
}
