use crate::event::kind::EventKind;
use crate::runtime::telemetry;
use crate::sink::DeliveryPolicy;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_NTP_SERVER: &str = "pool.ntp.org";
const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9090";
const DEFAULT_COORDINATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DRIFT_INTERVAL_SECS: u64 = 300;
const DEFAULT_SINK_DRAIN_DEADLINE_SECS: u64 = 15;
const DEFAULT_WAIT_CEILING_SECS: u64 = 60;
const SUPPORTED_CHECKPOINT: &str = "finalized";

/// Per-deriver knobs. Missing entries fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriverSettings {
    /// Disabled derivers are constructed but never started.
    pub enabled: bool,
    /// Number of epochs the deriver stays behind the finalized
    /// checkpoint.
    pub head_lag_epochs: u64,
    /// Number of upcoming positions to warm via background fetches
    /// after each commit. Zero disables prefetch.
    pub lookahead_distance: u64,
}

impl Default for DeriverSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            head_lag_epochs: 1,
            lookahead_distance: 0,
        }
    }
}

/// Runtime configuration for the harvester.
///
/// All instances must be constructed via [`HarvesterConfig::builder`] or
/// [`HarvesterConfig::new`] so invariants are validated before any
/// consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    name: String,
    labels: BTreeMap<String, String>,
    ntp_server: String,
    override_network_name: Option<String>,
    metrics_addr: String,
    pprof_addr: Option<String>,
    coordinator_addr: String,
    coordinator_tls: bool,
    coordinator_timeout: Duration,
    beacon_node_addr: String,
    event_topics: Vec<String>,
    checkpoint_name: String,
    override_start_epoch: Option<u64>,
    delivery_policy: DeliveryPolicy,
    drift_interval: Duration,
    metrics_interval: Duration,
    sink_drain_deadline: Duration,
    wait_ceiling: Duration,
    derivers: BTreeMap<EventKind, DeriverSettings>,
}

pub struct HarvesterConfigParams {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ntp_server: String,
    pub override_network_name: Option<String>,
    pub metrics_addr: String,
    pub pprof_addr: Option<String>,
    pub coordinator_addr: String,
    pub coordinator_tls: bool,
    pub coordinator_timeout: Duration,
    pub beacon_node_addr: String,
    pub event_topics: Vec<String>,
    pub checkpoint_name: String,
    pub override_start_epoch: Option<u64>,
    pub delivery_policy: DeliveryPolicy,
    pub drift_interval: Duration,
    pub metrics_interval: Duration,
    pub sink_drain_deadline: Duration,
    pub wait_ceiling: Duration,
    pub derivers: BTreeMap<EventKind, DeriverSettings>,
}

impl HarvesterConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> HarvesterConfigBuilder {
        HarvesterConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`HarvesterConfig::builder`] for ergonomics when many values use
    /// defaults.
    pub fn new(params: HarvesterConfigParams) -> Result<Self> {
        let HarvesterConfigParams {
            name,
            labels,
            ntp_server,
            override_network_name,
            metrics_addr,
            pprof_addr,
            coordinator_addr,
            coordinator_tls,
            coordinator_timeout,
            beacon_node_addr,
            event_topics,
            checkpoint_name,
            override_start_epoch,
            delivery_policy,
            drift_interval,
            metrics_interval,
            sink_drain_deadline,
            wait_ceiling,
            derivers,
        } = params;

        let config = Self {
            name: trimmed_string(name),
            labels,
            ntp_server: trimmed_string(ntp_server),
            override_network_name,
            metrics_addr: trimmed_string(metrics_addr),
            pprof_addr,
            coordinator_addr: trimmed_string(coordinator_addr),
            coordinator_tls,
            coordinator_timeout,
            beacon_node_addr: trimmed_string(beacon_node_addr),
            event_topics,
            checkpoint_name: trimmed_string(checkpoint_name),
            override_start_epoch,
            delivery_policy,
            drift_interval,
            metrics_interval,
            sink_drain_deadline,
            wait_ceiling,
            derivers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Human-readable instance name stamped into client metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User-supplied labels carried on every event.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Reference time server polled by the drift probe.
    pub fn ntp_server(&self) -> &str {
        &self.ntp_server
    }

    /// Replaces the beacon-reported network name in client metadata.
    pub fn override_network_name(&self) -> Option<&str> {
        self.override_network_name.as_deref()
    }

    /// Address the embedding binary serves metrics on.
    pub fn metrics_addr(&self) -> &str {
        &self.metrics_addr
    }

    /// Optional address the embedding binary serves pprof on.
    pub fn pprof_addr(&self) -> Option<&str> {
        self.pprof_addr.as_deref()
    }

    /// Coordinator endpoint.
    pub fn coordinator_addr(&self) -> &str {
        &self.coordinator_addr
    }

    pub fn coordinator_tls(&self) -> bool {
        self.coordinator_tls
    }

    /// Per-RPC timeout for coordinator calls.
    pub fn coordinator_timeout(&self) -> Duration {
        self.coordinator_timeout
    }

    /// Beacon node endpoint.
    pub fn beacon_node_addr(&self) -> &str {
        &self.beacon_node_addr
    }

    /// Beacon event topics the transport subscribes to.
    pub fn event_topics(&self) -> &[String] {
        &self.event_topics
    }

    /// Name of the checkpoint the iterators are bounded by.
    pub fn checkpoint_name(&self) -> &str {
        &self.checkpoint_name
    }

    /// Epoch to seed cursors from when the coordinator has none stored.
    pub fn override_start_epoch(&self) -> Option<u64> {
        self.override_start_epoch
    }

    /// Whether cursor advance requires at least one sink to accept.
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        self.delivery_policy
    }

    /// Cadence of the clock-drift probe.
    pub fn drift_interval(&self) -> Duration {
        self.drift_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Upper bound on waiting for sinks to drain during shutdown.
    pub fn sink_drain_deadline(&self) -> Duration {
        self.sink_drain_deadline
    }

    /// Cap applied to wait hints while the chain finalizes.
    pub fn wait_ceiling(&self) -> Duration {
        self.wait_ceiling
    }

    /// Settings for the given deriver, falling back to defaults.
    pub fn deriver_settings(&self, kind: EventKind) -> DeriverSettings {
        self.derivers.get(&kind).copied().unwrap_or_default()
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.name, "name")?;
        ensure_not_empty(&self.ntp_server, "ntp_server")?;
        ensure_not_empty(&self.metrics_addr, "metrics_addr")?;
        ensure_not_empty(&self.coordinator_addr, "coordinator_addr")?;
        validate_url(&self.beacon_node_addr, "beacon_node_addr")?;

        if let Some(pprof_addr) = &self.pprof_addr {
            ensure_not_empty(pprof_addr, "pprof_addr")?;
        }

        if self.checkpoint_name != SUPPORTED_CHECKPOINT {
            bail!(
                "checkpoint_name {:?} is not supported; only {:?} is",
                self.checkpoint_name,
                SUPPORTED_CHECKPOINT,
            );
        }

        if self.coordinator_timeout.is_zero() {
            bail!("coordinator_timeout must be greater than 0");
        }

        if self.drift_interval.is_zero() {
            bail!("drift_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.sink_drain_deadline.is_zero() {
            bail!("sink_drain_deadline must be greater than 0");
        }

        if self.wait_ceiling.is_zero() {
            bail!("wait_ceiling must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct HarvesterConfigBuilder {
    name: Option<String>,
    labels: BTreeMap<String, String>,
    ntp_server: Option<String>,
    override_network_name: Option<String>,
    metrics_addr: Option<String>,
    pprof_addr: Option<String>,
    coordinator_addr: Option<String>,
    coordinator_tls: Option<bool>,
    coordinator_timeout: Option<Duration>,
    beacon_node_addr: Option<String>,
    event_topics: Option<Vec<String>>,
    checkpoint_name: Option<String>,
    override_start_epoch: Option<u64>,
    delivery_policy: Option<DeliveryPolicy>,
    drift_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    sink_drain_deadline: Option<Duration>,
    wait_ceiling: Option<Duration>,
    derivers: BTreeMap<EventKind, DeriverSettings>,
}

impl HarvesterConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn ntp_server(mut self, server: impl Into<String>) -> Self {
        self.ntp_server = Some(server.into());
        self
    }

    pub fn override_network_name(mut self, name: impl Into<String>) -> Self {
        self.override_network_name = Some(name.into());
        self
    }

    pub fn metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.metrics_addr = Some(addr.into());
        self
    }

    pub fn pprof_addr(mut self, addr: impl Into<String>) -> Self {
        self.pprof_addr = Some(addr.into());
        self
    }

    pub fn coordinator_addr(mut self, addr: impl Into<String>) -> Self {
        self.coordinator_addr = Some(addr.into());
        self
    }

    pub fn coordinator_tls(mut self, tls: bool) -> Self {
        self.coordinator_tls = Some(tls);
        self
    }

    pub fn coordinator_timeout(mut self, timeout: Duration) -> Self {
        self.coordinator_timeout = Some(timeout);
        self
    }

    pub fn beacon_node_addr(mut self, addr: impl Into<String>) -> Self {
        self.beacon_node_addr = Some(addr.into());
        self
    }

    pub fn event_topics(mut self, topics: Vec<String>) -> Self {
        self.event_topics = Some(topics);
        self
    }

    pub fn checkpoint_name(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = Some(name.into());
        self
    }

    pub fn override_start_epoch(mut self, epoch: u64) -> Self {
        self.override_start_epoch = Some(epoch);
        self
    }

    pub fn delivery_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery_policy = Some(policy);
        self
    }

    pub fn drift_interval(mut self, interval: Duration) -> Self {
        self.drift_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn sink_drain_deadline(mut self, deadline: Duration) -> Self {
        self.sink_drain_deadline = Some(deadline);
        self
    }

    pub fn wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = Some(ceiling);
        self
    }

    pub fn deriver(mut self, kind: EventKind, settings: DeriverSettings) -> Self {
        self.derivers.insert(kind, settings);
        self
    }

    pub fn build(self) -> Result<HarvesterConfig> {
        let params = HarvesterConfigParams {
            name: self.name.context("name is required")?,
            labels: self.labels,
            ntp_server: self
                .ntp_server
                .unwrap_or_else(|| DEFAULT_NTP_SERVER.to_owned()),
            override_network_name: self.override_network_name,
            metrics_addr: self
                .metrics_addr
                .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_owned()),
            pprof_addr: self.pprof_addr,
            coordinator_addr: self
                .coordinator_addr
                .context("coordinator_addr is required")?,
            coordinator_tls: self.coordinator_tls.unwrap_or(false),
            coordinator_timeout: self
                .coordinator_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_COORDINATOR_TIMEOUT_SECS)),
            beacon_node_addr: self
                .beacon_node_addr
                .context("beacon_node_addr is required")?,
            event_topics: self
                .event_topics
                .unwrap_or_else(|| vec!["block".to_owned()]),
            checkpoint_name: self
                .checkpoint_name
                .unwrap_or_else(|| SUPPORTED_CHECKPOINT.to_owned()),
            override_start_epoch: self.override_start_epoch,
            delivery_policy: self.delivery_policy.unwrap_or_default(),
            drift_interval: self
                .drift_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_DRIFT_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            sink_drain_deadline: self
                .sink_drain_deadline
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SINK_DRAIN_DEADLINE_SECS)),
            wait_ceiling: self
                .wait_ceiling
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_WAIT_CEILING_SECS)),
            derivers: self.derivers,
        };

        HarvesterConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
