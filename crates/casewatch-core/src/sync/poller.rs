use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest period a poller accepts; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Run `tick` immediately and then every `period` until `epoch` is cancelled.
///
/// A tick that is still running when the next one is due delays the schedule
/// instead of bursting, and cancellation interrupts an in-flight tick.
pub(crate) fn spawn_poller<F, Fut>(
    name: &'static str,
    period: Duration,
    epoch: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(poller = name, period_secs = period.as_secs(), "Poller started");

        loop {
            tokio::select! {
                biased;
                _ = epoch.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = epoch.cancelled() => break,
                _ = tick() => {}
            }
        }

        debug!(poller = name, "Poller stopped");
    })
}

/// Pollers started for one credential, torn down together
pub(crate) struct PollerSet {
    epoch: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PollerSet {
    pub(crate) fn new(epoch: CancellationToken) -> Self {
        Self {
            epoch,
            handles: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub(crate) fn epoch(&self) -> &CancellationToken {
        &self.epoch
    }

    /// Cancel the epoch and abort every task. In-flight calls are dropped.
    pub(crate) fn stop(self) {
        self.epoch.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}
