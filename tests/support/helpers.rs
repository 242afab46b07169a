use anyhow::{bail, Result};
use beacontap::{CoordinatorClient, EventKind, Position};
use std::time::Duration;
use tokio::time::sleep;

pub use beacontap::init_tracing;

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(description: &str, timeout: Duration, condition: F) -> Result<()>
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out after {timeout:?} waiting for {description}");
}

/// Waits until the stored cursor for `(network_id, kind)` reaches at
/// least `position`.
pub async fn wait_for_cursor(
    coordinator: &dyn CoordinatorClient,
    network_id: &str,
    kind: EventKind,
    position: Position,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stored = coordinator.get_location(network_id, kind).await?;
        if stored.map(|cursor| cursor >= position).unwrap_or(false) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "timed out after {timeout:?} waiting for cursor {kind} >= {position}; stored {stored:?}"
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Asserts that positions are strictly increasing (intra-position ties
/// allowed only with increasing in-block indices).
pub fn assert_ordered(events: &[beacontap::DecoratedEvent]) {
    for pair in events.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        assert!(
            first.position < second.position
                || (first.position == second.position
                    && first.additional_data.position_in_block
                        < second.additional_data.position_in_block),
            "events out of order: {:?} then {:?}",
            (first.position, first.additional_data.position_in_block),
            (second.position, second.additional_data.position_in_block),
        );
    }
}
