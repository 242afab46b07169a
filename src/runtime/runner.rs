use crate::harvester::Harvester;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the harvester lifecycle and handles OS signals for
/// graceful shutdowns.
pub struct Runner {
    harvester: Harvester,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Wraps a harvester and wires a root [`CancellationToken`] that
    /// propagates through the entire pipeline (derivers, iterators,
    /// probes, sinks).
    pub fn new(mut harvester: Harvester) -> Self {
        let shutdown = CancellationToken::new();
        harvester.replace_shutdown_root(shutdown.clone());
        Self {
            harvester,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers
    /// can integrate with their own signal handlers or cancellation
    /// strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    /// Starts the underlying harvester.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.harvester.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the pipeline gracefully by cancelling the root token and
    /// delegating to the harvester.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.harvester.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    /// Runs until SIGINT or SIGTERM is received, or the shutdown token
    /// is cancelled elsewhere.
    pub async fn run_until_shutdown(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for SIGINT or SIGTERM to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("SIGINT received; shutting down runner");
            }
            _ = wait_for_terminate() => {
                tracing::info!("SIGTERM received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        self.harvester.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.harvester.replace_shutdown_root(self.shutdown.clone());
    }
}

#[cfg(unix)]
async fn wait_for_terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            terminate.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
    std::future::pending::<()>().await;
}
