use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential backoff bounds used by the checkpoint iterators and the
/// deriver loops.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
        }
    }
}

/// Stateful exponential backoff with jitter. `bump` doubles the delay
/// up to the ceiling and returns a jittered sample; `reset` restores
/// the floor after a successful operation.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    pub fn bump(&mut self) -> Duration {
        let next = match self.current {
            None => self.policy.floor,
            Some(current) => next_backoff(current, self.policy.ceiling),
        };
        self.current = Some(next);
        jittered(next)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The raw (un-jittered) delay the next `bump` would start from.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

/// Samples uniformly from `[delay / 2, delay]` so racing instances
/// spread their retries.
pub(crate) fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let nanos = delay.as_nanos().min(u128::from(u64::MAX)) as u64;
    let sampled = rand::thread_rng().gen_range(nanos / 2..=nanos);
    Duration::from_nanos(sampled)
}

fn next_backoff(current: Duration, ceiling: Duration) -> Duration {
    if current.is_zero() {
        return ceiling.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > ceiling {
        next = ceiling;
    }
    next
}

/// Sleeps for `delay`, aborting with an error as soon as the token
/// fires so callers can unwind without finishing the wait.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("wait cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
